use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Local};
use log::info;
use parking_lot::Mutex;

use crate::error::RelayError;
use crate::metrics;
use crate::sink::Sink;

type Result<T> = std::result::Result<T, RelayError>;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Connection history of one username. Records are never removed.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub username: String,
    pub first_seen_at: DateTime<Local>,
    pub last_connected_at: DateTime<Local>,
    pub last_disconnected_at: Option<DateTime<Local>>,
    pub total_connections: u32,
    pub currently_active: bool,
}

impl UserRecord {
    fn new(username: &str) -> Self {
        let now = Local::now();
        UserRecord {
            username: username.to_owned(),
            first_seen_at: now,
            last_connected_at: now,
            last_disconnected_at: None,
            total_connections: 1,
            currently_active: true,
        }
    }
}

impl fmt::Display for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User: {}, Connections: {}, First: {}, Last: {}",
            self.username,
            self.total_connections,
            self.first_seen_at.format(TIMESTAMP_FORMAT),
            self.last_connected_at.format(TIMESTAMP_FORMAT)
        )
    }
}

/// Outcome of a successful [`UserRegistry::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joined {
    pub first_time: bool,
    pub total_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_users: usize,
    pub known_users: usize,
    pub online: Vec<String>,
    pub most_active: Option<(String, u32)>,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Active Users: {}", self.active_users)?;
        write!(f, "Total Users Ever: {}", self.known_users)?;
        if !self.online.is_empty() {
            write!(f, "\nCurrently Online: {}", self.online.join(", "))?;
        }
        if let Some((username, connections)) = &self.most_active {
            write!(
                f,
                "\nMost Active User: {} ({} connections)",
                username, connections
            )?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Users {
    active: HashMap<String, Sink>,
    history: HashMap<String, UserRecord>,
}

/// Active usernames and their history, guarded together by one lock.
///
/// The lock is only held for map operations; nothing here writes to a sink.
#[derive(Default)]
pub struct UserRegistry {
    users: Mutex<Users>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn join(&self, username: &str, sink: Sink) -> Result<Joined> {
        let mut users = self.users.lock();
        if users.active.contains_key(username) {
            return Err(RelayError::AlreadyActive(username.to_owned()));
        }

        let joined = match users.history.get_mut(username) {
            Some(record) => {
                record.total_connections += 1;
                record.last_connected_at = Local::now();
                record.currently_active = true;
                Joined {
                    first_time: false,
                    total_connections: record.total_connections,
                }
            }
            None => {
                users
                    .history
                    .insert(username.to_owned(), UserRecord::new(username));
                Joined {
                    first_time: true,
                    total_connections: 1,
                }
            }
        };
        users.active.insert(username.to_owned(), sink);
        let active = users.active.len();
        drop(users);

        metrics::NUM_ACTIVE_USERS.set(active as i64);
        info!("User '{}' connected. Active users: {}", username, active);
        Ok(joined)
    }

    /// Returns whether `username` was active.
    pub fn leave(&self, username: &str) -> bool {
        self.remove(username, None)
    }

    /// Like [`UserRegistry::leave`], but only while `username` is still held
    /// through `sink`. A newer connection that took the name is left alone.
    pub fn leave_if(&self, username: &str, sink: &Sink) -> bool {
        self.remove(username, Some(sink))
    }

    fn remove(&self, username: &str, owner: Option<&Sink>) -> bool {
        let mut users = self.users.lock();
        match (users.active.get(username), owner) {
            (None, _) => return false,
            (Some(held), Some(owner)) if !held.same_channel(owner) => return false,
            _ => {}
        }
        users.active.remove(username);
        if let Some(record) = users.history.get_mut(username) {
            record.last_disconnected_at = Some(Local::now());
            record.currently_active = false;
        }
        let active = users.active.len();
        drop(users);

        metrics::NUM_ACTIVE_USERS.set(active as i64);
        info!("User '{}' disconnected. Active users: {}", username, active);
        true
    }

    /// Point-in-time copy of the active set.
    pub fn snapshot_active(&self) -> Vec<(String, Sink)> {
        self.users
            .lock()
            .active
            .iter()
            .map(|(username, sink)| (username.clone(), sink.clone()))
            .collect()
    }

    pub fn sink_of(&self, username: &str) -> Option<Sink> {
        self.users.lock().active.get(username).cloned()
    }

    pub fn lookup_history(&self, username: &str) -> Option<UserRecord> {
        self.users.lock().history.get(username).cloned()
    }

    pub fn is_active(&self, username: &str) -> bool {
        self.users.lock().active.contains_key(username)
    }

    pub fn active_count(&self) -> usize {
        self.users.lock().active.len()
    }

    /// Sorted, so callers can print it as-is.
    pub fn active_usernames(&self) -> Vec<String> {
        let mut usernames: Vec<String> = self.users.lock().active.keys().cloned().collect();
        usernames.sort();
        usernames
    }

    pub fn stats(&self) -> RegistryStats {
        let users = self.users.lock();
        let mut online: Vec<String> = users.active.keys().cloned().collect();
        online.sort();
        let most_active = users
            .history
            .values()
            .max_by(|a, b| {
                a.total_connections
                    .cmp(&b.total_connections)
                    .then_with(|| b.username.cmp(&a.username))
            })
            .map(|record| (record.username.clone(), record.total_connections));

        RegistryStats {
            active_users: users.active.len(),
            known_users: users.history.len(),
            online,
            most_active,
        }
    }
}
