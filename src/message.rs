use std::fmt;

use chrono::{DateTime, Local};

use crate::registry::Joined;

pub const GREETING: &str = "Welcome to the Chat Server!";
pub const USERNAME_PROMPT: &str = "Please enter your username:";
pub const HELP_HINT: &str = "Type /help for available commands.";
pub const SHUTDOWN_NOTICE: &str = "Server is shutting down. Goodbye!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Broadcast { from: String, text: String },
    Private { from: String, to: String, text: String },
    System(String),
}

#[derive(Debug, Clone)]
pub struct Message {
    pub kind: Kind,
    pub sent_at: DateTime<Local>,
}

impl Message {
    fn new(kind: Kind) -> Self {
        Message {
            kind,
            sent_at: Local::now(),
        }
    }

    pub fn broadcast(from: &str, text: &str) -> Self {
        Message::new(Kind::Broadcast {
            from: from.to_owned(),
            text: text.to_owned(),
        })
    }

    pub fn private(from: &str, to: &str, text: &str) -> Self {
        Message::new(Kind::Private {
            from: from.to_owned(),
            to: to.to_owned(),
            text: text.to_owned(),
        })
    }

    pub fn system(text: impl Into<String>) -> Self {
        Message::new(Kind::System(text.into()))
    }

    /// True only for a chat line written by `username`; such a line is never
    /// echoed back to its author.
    pub fn is_broadcast_from(&self, username: &str) -> bool {
        matches!(&self.kind, Kind::Broadcast { from, .. } if from == username)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Broadcast { from, text } => write!(f, "{}: {}", from, text),
            Kind::Private { from, to, text } => write!(f, "[PRIVATE] {} -> {}: {}", from, to, text),
            Kind::System(text) => write!(f, "[SYSTEM] {}", text),
        }
    }
}

pub fn welcome(username: &str, joined: &Joined) -> String {
    if joined.first_time {
        format!("Welcome to the chat, {}! This is your first time here.", username)
    } else {
        format!(
            "Welcome back, {}! This is your connection #{}",
            username, joined.total_connections
        )
    }
}

pub fn join_notice(username: &str, joined: &Joined) -> String {
    if joined.first_time {
        format!("{} has joined the chat for the first time!", username)
    } else {
        format!(
            "{} has returned to the chat (connection #{})",
            username, joined.total_connections
        )
    }
}

pub fn departure_notice(username: &str) -> String {
    format!("{} has left the chat", username)
}

pub fn farewell(username: &str) -> String {
    format!(
        "Goodbye {}! You can reconnect anytime using the same username.",
        username
    )
}
