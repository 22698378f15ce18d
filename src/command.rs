use std::str::FromStr;

use failure::Fail;

pub const HELP: &[&str] = &[
    "Available commands:",
    "/help - Show this help message",
    "/list - Show list of connected users",
    "/whisper <username> <message> - Send private message",
    "/whoami - Show your connection info",
    "/stats - Show server statistics",
    "/exit - Disconnect from server",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Whisper { to: String, text: String },
    WhoAmI,
    Stats,
    Quit,
}

#[derive(Debug, Fail, PartialEq, Eq)]
pub enum CommandError {
    #[fail(display = "Usage: /whisper <username> <message>")]
    WhisperUsage,

    #[fail(display = "Unknown command: {}. Type /help for available commands.", _0)]
    Unknown(String),
}

impl Command {
    pub fn is_command(line: &str) -> bool {
        line.starts_with('/')
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (word, rest) = split_word(line.trim());
        let word = word.to_lowercase();
        match word.as_str() {
            "/help" => Ok(Command::Help),
            "/list" => Ok(Command::List),
            "/whoami" => Ok(Command::WhoAmI),
            "/stats" => Ok(Command::Stats),
            "/exit" | "/quit" => Ok(Command::Quit),
            "/whisper" => {
                let (to, text) = split_word(rest);
                if to.is_empty() || text.is_empty() {
                    return Err(CommandError::WhisperUsage);
                }
                Ok(Command::Whisper {
                    to: to.to_owned(),
                    text: text.to_owned(),
                })
            }
            _ => Err(CommandError::Unknown(word)),
        }
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}
