use std::path::PathBuf;

use clap::Parser;
use log::warn;

pub const DEFAULT_PORT: u16 = 12345;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TCP port to accept chat connections on
    pub(crate) port: Option<String>,
    /// Configuration file, created with defaults if missing
    #[arg(short, long, default_value = "relay.toml")]
    pub(crate) config: PathBuf,
    /// Metrics server address, overrides the configuration file
    #[arg(short, long)]
    pub(crate) metrics_address: Option<String>,
}

impl Args {
    pub fn listen_port(&self) -> u16 {
        resolve_port(self.port.as_deref())
    }
}

/// Bad input falls back to [`DEFAULT_PORT`] rather than failing.
fn resolve_port(raw: Option<&str>) -> u16 {
    let raw = match raw {
        Some(raw) => raw,
        None => return DEFAULT_PORT,
    };
    match raw.trim().parse::<u32>() {
        Ok(port) if (1024..=65535).contains(&port) => port as u16,
        Ok(_) => {
            warn!("Invalid port number. Using default port {}", DEFAULT_PORT);
            DEFAULT_PORT
        }
        Err(_) => {
            warn!("Invalid port format. Using default port {}", DEFAULT_PORT);
            DEFAULT_PORT
        }
    }
}
