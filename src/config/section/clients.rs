//! `[clients]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [clients]
//! heartbeat_timeout_ms = 60000      # Drop clients silent for this long
//! sweep_interval_ms = 1000          # How often stale clients are swept
//! full_refresh_interval_ms = 0      # Periodic recompute of everything; 0 = off
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientsConfig {
    pub heartbeat_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub full_refresh_interval_ms: u64,
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 60_000,
            sweep_interval_ms: 1_000,
            full_refresh_interval_ms: 0,
        }
    }
}

impl ClientsConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn full_refresh_interval(&self) -> Option<Duration> {
        (self.full_refresh_interval_ms > 0).then(|| Duration::from_millis(self.full_refresh_interval_ms))
    }

    /// Timer settings that differ in `other`. The manager arms its timers
    /// once at start, so these cannot change on reload.
    pub fn startup_changes(&self, other: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.sweep_interval_ms != other.sweep_interval_ms {
            changed.push("clients.sweep_interval_ms");
        }
        if self.full_refresh_interval_ms != other.full_refresh_interval_ms {
            changed.push("clients.full_refresh_interval_ms");
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_startup_changes() {
        let base = test_parse_config("");
        let timers = test_parse_config("[clients]\nsweep_interval_ms = 50\nheartbeat_timeout_ms = 9000");
        assert_eq!(base.clients.startup_changes(&timers.clients), vec!["clients.sweep_interval_ms"]);

        let heartbeat = test_parse_config("[clients]\nheartbeat_timeout_ms = 9000");
        assert!(base.clients.startup_changes(&heartbeat.clients).is_empty());
    }

    #[test]
    fn test_clients_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.clients.heartbeat_timeout().as_secs(), 60);
        assert_eq!(config.clients.sweep_interval_ms, 1_000);
        assert!(config.clients.full_refresh_interval().is_none());
    }

    #[test]
    fn test_full_refresh_enabled() {
        let config = test_parse_config("[clients]\nfull_refresh_interval_ms = 30000");
        assert_eq!(config.clients.full_refresh_interval().map(|d| d.as_secs()), Some(30));
    }
}
