//! Server and client configuration with sensible defaults.
//!
//! All operational parameters are centralized here and passed to
//! constructors explicitly; there are no global configuration
//! singletons. Every value has a documented default.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{JimError, Result};

/// Default TCP port for the JIM protocol.
pub const DEFAULT_PORT: u16 = 7777;

/// Lowest port number accepted by either binary (exclusive bound 1023).
pub const MIN_PORT: u16 = 1024;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Dispatch-loop server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listening socket binds to.
    pub address: IpAddr,

    /// TCP port for the listener. Must be in `1024..=65535`.
    pub port: u16,

    /// Directory holding the pending-queue dump and the user directory.
    pub data_dir: PathBuf,

    /// Interval between pending-store flush passes, in milliseconds.
    /// This bounds how long the dispatch loop waits between delivery
    /// attempts when no sockets are active.
    pub flush_interval_ms: u64,

    /// Delay between bind retries while the address is still in use,
    /// in seconds.
    pub bind_retry_delay_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("jimchat-data"),
            flush_interval_ms: 200,
            bind_retry_delay_secs: 1,
        }
    }
}

impl ServerConfig {
    /// Validates all configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.port < MIN_PORT {
            return Err(JimError::ConfigError {
                reason: format!(
                    "port must be in {}..=65535, got {}",
                    MIN_PORT, self.port
                ),
            });
        }

        if self.flush_interval_ms == 0 {
            return Err(JimError::ConfigError {
                reason: "flush_interval_ms must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Reference client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Address of the server to dial.
    pub server_addr: IpAddr,

    /// Server TCP port. Must be in `1024..=65535`.
    pub port: u16,

    /// Account name presented in the initial presence message.
    pub username: String,

    /// Optional password (sent with `authenticate` instead of
    /// `presence` when present).
    pub password: Option<String>,

    /// Status text carried in the presence message.
    pub status: String,

    /// Delay between reconnection attempts, in seconds.
    pub reconnect_delay_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            username: String::new(),
            password: None,
            status: String::new(),
            reconnect_delay_secs: 1,
        }
    }
}

impl ClientConfig {
    /// Validates all configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.port < MIN_PORT {
            return Err(JimError::ConfigError {
                reason: format!(
                    "port must be in {}..=65535, got {}",
                    MIN_PORT, self.port
                ),
            });
        }

        if self.username.is_empty() {
            return Err(JimError::ConfigError {
                reason: "username must not be empty".into(),
            });
        }

        Ok(())
    }
}
