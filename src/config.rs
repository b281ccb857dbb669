use std::{env, net::SocketAddr};

use thiserror::Error;

/// Hard ceiling for `MCP_NOTIFICATION_CAP`; a tool call may never emit more
/// notifications than this in a time-boxed execution environment.
pub const MAX_NOTIFICATION_CAP: u32 = 1000;
pub const DEFAULT_NOTIFICATION_CAP: u32 = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub notification_cap: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("MCP_NOTIFICATION_CAP must be between 1 and {MAX_NOTIFICATION_CAP}")]
    InvalidNotificationCap,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        let bind_port = env::var("BIND_PORT")
            .ok()
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);
        let notification_cap = env::var("MCP_NOTIFICATION_CAP")
            .ok()
            .map(|value| {
                value
                    .parse::<u32>()
                    .ok()
                    .filter(|cap| (1..=MAX_NOTIFICATION_CAP).contains(cap))
                    .ok_or(ConfigError::InvalidNotificationCap)
            })
            .transpose()?
            .unwrap_or(DEFAULT_NOTIFICATION_CAP);

        let config = Self {
            bind_addr,
            bind_port,
            notification_cap,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
