use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio_util::codec::LinesCodecError;

use crate::broadcaster::{broadcast, deliver_to};
use crate::command::{Command, HELP};
use crate::error::RelayError;
use crate::message::{self, Message, GREETING, HELP_HINT, USERNAME_PROMPT};
use crate::metrics;
use crate::registry::{UserRegistry, TIMESTAMP_FORMAT};
use crate::sink::Sink;

type Result<T> = std::result::Result<T, RelayError>;

const RULE: &str = "========================================";

#[derive(Debug)]
pub enum Phase {
    Connecting,
    AwaitingUsername,
    Active { username: String, joined_at: Instant },
    Closing,
    Closed,
}

/// One accepted connection, from handshake to cleanup.
///
/// Dropping a session is what ends it: an active user is removed from the
/// registry, the others are told it left, and the sink is closed.
pub struct Session {
    peer: SocketAddr,
    sink: Sink,
    registry: Arc<UserRegistry>,
    phase: Phase,
}

impl Session {
    pub fn new(peer: SocketAddr, sink: Sink, registry: Arc<UserRegistry>) -> Self {
        Session {
            peer,
            sink,
            registry,
            phase: Phase::Connecting,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match &self.phase {
            Phase::Active { username, .. } => Some(username),
            _ => None,
        }
    }

    /// Drive the session over `incoming` lines until the peer quits,
    /// disconnects or fails. Cleanup happens when `self` is dropped.
    pub async fn run<S>(mut self, mut incoming: S)
    where
        S: Stream<Item = std::result::Result<String, LinesCodecError>> + Unpin,
    {
        self.phase = Phase::AwaitingUsername;
        let username = match self.handshake(&mut incoming).await {
            Ok(username) => username,
            Err(e) => {
                info!("Connection from {} rejected: {}", self.peer, e);
                return;
            }
        };

        match self.chat(&username, &mut incoming).await {
            Ok(()) => info!("Client {} quit", username),
            Err(RelayError::PeerDisconnected) => {
                info!("Client {} disconnected normally", username)
            }
            Err(e) => warn!("Error handling client {}: {}", username, e),
        }
    }

    async fn handshake<S>(&mut self, incoming: &mut S) -> Result<String>
    where
        S: Stream<Item = std::result::Result<String, LinesCodecError>> + Unpin,
    {
        self.send(GREETING);
        self.send(USERNAME_PROMPT);

        let candidate = match incoming.next().await {
            Some(line) => line.map_err(read_failure)?,
            None => String::new(),
        };
        let username = candidate.trim();
        if username.is_empty() {
            let rejection = RelayError::InvalidUsername;
            self.send(&rejection.to_string());
            return Err(rejection);
        }

        let joined = match self.registry.join(username, self.sink.clone()) {
            Ok(joined) => joined,
            Err(e) => {
                self.send(&e.to_string());
                return Err(e);
            }
        };
        self.phase = Phase::Active {
            username: username.to_owned(),
            joined_at: Instant::now(),
        };

        self.send(&message::welcome(username, &joined));
        broadcast(
            &Message::system(message::join_notice(username, &joined)),
            &self.registry,
        );
        self.send(HELP_HINT);
        Ok(username.to_owned())
    }

    /// Returns `Ok` only when the user asked to quit.
    async fn chat<S>(&self, username: &str, incoming: &mut S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<String, LinesCodecError>> + Unpin,
    {
        while let Some(line) = incoming.next().await {
            let line = line.map_err(read_failure)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if !Command::is_command(line) {
                broadcast(&Message::broadcast(username, line), &self.registry);
                continue;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if !self.execute(username, command) {
                        return Ok(());
                    }
                }
                Err(e) => self.send(&e.to_string()),
            }
        }
        Err(RelayError::PeerDisconnected)
    }

    /// Returns false once the session should stop reading.
    fn execute(&self, username: &str, command: Command) -> bool {
        match command {
            Command::Help => HELP.iter().for_each(|line| self.send(line)),
            Command::List => {
                let online = self.registry.active_usernames();
                let online = if online.is_empty() {
                    "No users connected".to_owned()
                } else {
                    online.join(", ")
                };
                self.send(&format!("Connected users: {}", online));
            }
            Command::Whisper { to, text } => self.whisper(username, &to, &text),
            Command::WhoAmI => self.who_am_i(username),
            Command::Stats => {
                let stats = self.registry.stats();
                info!("Statistics requested by {}\n{}", username, stats);
                self.send("Server Statistics:");
                stats.to_string().lines().for_each(|line| self.send(line));
            }
            Command::Quit => {
                self.send(&message::farewell(username));
                return false;
            }
        }
        true
    }

    fn whisper(&self, username: &str, to: &str, text: &str) {
        if to == username {
            self.send("You cannot send a private message to yourself!");
            return;
        }
        if deliver_to(to, &Message::private(username, to, text), &self.registry) {
            self.send(&format!("[WHISPER to {}]: {}", to, text));
        } else {
            self.send(&format!("User '{}' not found or not connected.", to));
        }
    }

    fn who_am_i(&self, username: &str) {
        let record = match self.registry.lookup_history(username) {
            Some(record) => record,
            None => {
                self.send("User information not available.");
                return;
            }
        };
        self.send(RULE);
        self.send("Your Connection Information:");
        self.send(RULE);
        self.send(&format!("Username: {}", record.username));
        self.send(&format!("Total connections: {}", record.total_connections));
        self.send(&format!(
            "First connected: {}",
            record.first_seen_at.format(TIMESTAMP_FORMAT)
        ));
        self.send(&format!(
            "Current session started: {}",
            record.last_connected_at.format(TIMESTAMP_FORMAT)
        ));
        if let Some(at) = record.last_disconnected_at {
            self.send(&format!("Last disconnected: {}", at.format(TIMESTAMP_FORMAT)));
        }
        self.send("Status: Currently active");
        self.send(RULE);
    }

    fn send(&self, line: &str) {
        if self.sink.send_line(line).is_err() {
            debug!(
                "Dropping line for {} ({}): sink closed",
                self.username().unwrap_or("<no username>"),
                self.peer
            );
        }
    }

    fn close(&mut self) {
        match mem::replace(&mut self.phase, Phase::Closing) {
            Phase::Closed => {}
            Phase::Active {
                username,
                joined_at,
            } => {
                // An evicted session may find its name already taken by a
                // newer connection; that owner keeps the name and no one is
                // told it left.
                let removed = self.registry.leave_if(&username, &self.sink);
                if removed || !self.registry.is_active(&username) {
                    broadcast(
                        &Message::system(message::departure_notice(&username)),
                        &self.registry,
                    );
                }
                metrics::SESSION_DURATION_SEC.observe(joined_at.elapsed().as_secs_f64());
            }
            Phase::Connecting | Phase::AwaitingUsername | Phase::Closing => {}
        }
        self.sink.close();
        self.phase = Phase::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_failure(e: LinesCodecError) -> RelayError {
    RelayError::ReadFailure(e.to_string())
}
