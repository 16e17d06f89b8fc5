use serde::{Deserialize, Serialize};

pub mod prelude {
    pub use super::{Config, Relay, Storage};
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub relay: Relay,
    #[serde(default)]
    pub store: Storage,
}

/// Timeouts in milliseconds, reconnect interval in seconds (0 disables it).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Relay {
    pub timeout: u64,
    pub connect_timeout: u64,
    pub reconnect_interval: u64,
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            timeout: 10_000,
            connect_timeout: 5_000,
            reconnect_interval: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Storage {
    /// Relative paths resolve against the config directory.
    pub path: String,
}

impl Default for Storage {
    fn default() -> Self { Self { path: "services.ron".to_string() } }
}
