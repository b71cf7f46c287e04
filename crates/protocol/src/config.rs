//! Session configuration
//!
//! Both roles are configured from plain structs with sensible defaults.
//! They can also be loaded from a TOML file; every field is optional and
//! durations are given in milliseconds:
//!
//! ```toml
//! password = "secret"
//! request_timeout_ms = 10000
//! reconnect_interval_ms = 2000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_KEEPALIVE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Configuration for the connecting role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Shared secret sent in the handshake
    pub password: String,

    /// How long a request waits for its response
    pub request_timeout_ms: u64,

    /// Delay before reconnecting after the connection drops (0 disables)
    pub reconnect_interval_ms: u64,

    /// Buffer size between the transport and the session task
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_toml(path.as_ref())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        parse_toml(contents)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `None` when reconnection is disabled
    pub fn reconnect_interval(&self) -> Option<Duration> {
        non_zero(self.reconnect_interval_ms)
    }
}

/// Configuration for the accepting role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Shared secret every client must present
    pub password: String,

    pub request_timeout_ms: u64,

    /// Time between keepalive probes on an authenticated session (0 disables)
    pub keepalive_interval_ms: u64,

    /// How long a probe may stay unanswered before the session is destroyed
    pub keepalive_timeout_ms: u64,

    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            keepalive_timeout_ms: DEFAULT_KEEPALIVE_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_toml(path.as_ref())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        parse_toml(contents)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `None` when the keepalive monitor is disabled
    pub fn keepalive_interval(&self) -> Option<Duration> {
        non_zero(self.keepalive_interval_ms)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }
}

fn non_zero(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).map_err(|e| {
        ProtocolError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    parse_toml(&contents)
}

fn parse_toml<T: for<'de> Deserialize<'de>>(contents: &str) -> Result<T> {
    toml::from_str(contents)
        .map_err(|e| ProtocolError::Config(format!("failed to parse config: {}", e)))
}
