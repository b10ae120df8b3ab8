//! Relay configuration
//!
//! Loads hub and session tuning from an optional TOML file. Every key has a
//! default, so an absent file or an empty table yields a working setup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Maximum inbound message size accepted from a peer (bytes)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Pending outbound frames allowed per session before broadcasts are dropped
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Pending events allowed in the hub mailbox
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Time allowed between two inbound frames from a peer
pub const DEFAULT_PONG_WAIT_MS: u64 = 60_000;

/// Time allowed for a single frame write
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    /// Maximum inbound message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Bound of each session's outbound queue
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// Bound of the hub event mailbox
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Read deadline in milliseconds
    ///
    /// Refreshed by any inbound frame, including the pong a healthy peer sends
    /// back for each keepalive ping.
    #[serde(default = "default_pong_wait_ms")]
    pub pong_wait_ms: u64,
    /// Per-frame write deadline in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Deliver broadcasts back to the session that sent them
    #[serde(default = "default_echo_to_sender")]
    pub echo_to_sender: bool,
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_outbound_capacity() -> usize {
    DEFAULT_OUTBOUND_CAPACITY
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

fn default_pong_wait_ms() -> u64 {
    DEFAULT_PONG_WAIT_MS
}

fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}

fn default_echo_to_sender() -> bool {
    true
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_capacity: default_outbound_capacity(),
            mailbox_capacity: default_mailbox_capacity(),
            pong_wait_ms: default_pong_wait_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            echo_to_sender: default_echo_to_sender(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file
    ///
    /// A missing file is not an error and yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be greater than 0".to_string(),
            ));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbound_capacity must be greater than 0".to_string(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mailbox_capacity must be greater than 0".to_string(),
            ));
        }
        // The keepalive period is derived from pong_wait and must not round to zero
        if self.pong_wait_ms < 10 {
            return Err(ConfigError::Invalid(
                "pong_wait_ms must be at least 10".to_string(),
            ));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "write_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Read deadline for inbound frames
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Keepalive period, nine tenths of the read deadline
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms * 9 / 10)
    }

    /// Deadline for a single frame write
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
