//! Peer-local configuration
//!
//! Everything that varies per peer rather than per application: network
//! timeouts, retry policy, the gossip period, and the listen/bootstrap
//! settings a real transport would consume. Stored next to the chain as
//! `config.json` (or `.toml`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen port for the peer transport.
    pub port: u16,
    /// Bootstrap server address, if any.
    pub bootstrap: Option<String>,
    /// Bound on every network send, in milliseconds.
    pub send_timeout_ms: u64,
    /// Transient network failures are retried this many times with capped
    /// exponential backoff before the action fails.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt up to `retry_cap_ms`.
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
    /// Gossip ticker period, in milliseconds.
    pub gossip_interval_ms: u64,
    /// Logger toggle for nucleus `debug` output.
    pub debug_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 6283,
            bootstrap: None,
            send_timeout_ms: 5_000,
            max_retries: 3,
            retry_base_ms: 50,
            retry_cap_ms: 2_000,
            gossip_interval_ms: 2_000,
            debug_log: true,
        }
    }
}

impl Config {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_cap(&self) -> Duration {
        Duration::from_millis(self.retry_cap_ms)
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }
}
