//! Server configuration from environment variables.

use std::net::SocketAddr;

use questsync_core::sync::DEFAULT_TOTAL_LOCATIONS;
use thiserror::Error;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8088";
pub const DEFAULT_DB_PATH: &str = "./questsync.db";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid value '{value}' for {name}: {reason}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    pub total_locations: u64,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    /// Reads `QUESTSYNC_LISTEN_ADDR`, `QUESTSYNC_DB_PATH` and
    /// `QUESTSYNC_TOTAL_LOCATIONS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let addr = non_empty(lookup("QUESTSYNC_LISTEN_ADDR"))
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = addr.parse::<SocketAddr>().map_err(|e| ConfigError {
            name: "QUESTSYNC_LISTEN_ADDR",
            value: addr.clone(),
            reason: e.to_string(),
        })?;

        let db_path = non_empty(lookup("QUESTSYNC_DB_PATH"))
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let total_locations = match non_empty(lookup("QUESTSYNC_TOTAL_LOCATIONS")) {
            None => DEFAULT_TOTAL_LOCATIONS,
            Some(raw) => match raw.parse::<u64>() {
                Ok(total) if total > 0 => total,
                Ok(_) => {
                    return Err(ConfigError {
                        name: "QUESTSYNC_TOTAL_LOCATIONS",
                        value: raw,
                        reason: "must be at least 1".to_string(),
                    })
                }
                Err(e) => {
                    return Err(ConfigError {
                        name: "QUESTSYNC_TOTAL_LOCATIONS",
                        value: raw,
                        reason: e.to_string(),
                    })
                }
            },
        };

        Ok(Self {
            listen_addr,
            db_path,
            total_locations,
        })
    }
}
