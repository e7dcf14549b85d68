//! Manager tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_FINISHING_THREADS: usize = 2;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Manager configuration.
///
/// Every field has a default, so partial JSON documents deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Bound on the wait for all stores in `load_stores`.
    pub load_timeout_ms: u64,
    /// Threads of the pool that delivers background results.
    pub finishing_threads: usize,
    /// SQLite busy timeout applied to every store connection.
    pub busy_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: DEFAULT_LOAD_TIMEOUT_MS,
            finishing_threads: DEFAULT_FINISHING_THREADS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl ManagerConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Parses a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
