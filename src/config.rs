use std::fs;
use std::io;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Address the chat listener binds to; the port comes from the command line.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Where to serve `/metrics`. No metrics endpoint when unset.
    #[serde(default)]
    pub metrics_address: Option<String>,

    /// Base64 salt for hashing client addresses in metric labels.
    #[serde(default)]
    pub ip_hash_salt: Option<String>,

    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_max_line_length() -> usize {
    8192
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_host: default_bind_host(),
            metrics_address: None,
            ip_hash_salt: None,
            max_line_length: default_max_line_length(),
        }
    }
}

/// Reads the config at `path`, writing the defaults there first if it does not exist.
pub fn load(path: &Path) -> Result<Config, failure::Error> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let config = Config::default();
            fs::write(path, toml::to_string(&config)?)?;
            info!("Wrote default config to {}", path.display());
            Ok(config)
        }
        Err(e) => Err(e.into()),
    }
}
