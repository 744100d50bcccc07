//! `[listener]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [listener]
//! batch_window_ms = 5           # Debounce window for change events
//! reconnect_initial_ms = 100    # First reconnect backoff
//! reconnect_max_ms = 5000       # Backoff cap
//! heartbeat_timeout_ms = 0      # 0 disables connection liveness checks
//! resync_on_reconnect = true    # Recompute every subscription after a gap
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Origin listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub batch_window_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,

    /// Treat the connection as lost after this long without any event or
    /// heartbeat. `0` disables the check.
    pub heartbeat_timeout_ms: u64,

    /// After reconnecting, trigger every subscription of the origin once to
    /// catch up on changes missed while disconnected.
    pub resync_on_reconnect: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: 5,
            reconnect_initial_ms: 100,
            reconnect_max_ms: 5_000,
            heartbeat_timeout_ms: 0,
            resync_on_reconnect: true,
        }
    }
}

impl ListenerConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// Backoff before reconnect attempt `attempt` (1-based), doubling from
    /// `reconnect_initial_ms` up to `reconnect_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .reconnect_initial_ms
            .saturating_mul(1u64 << shift)
            .min(self.reconnect_max_ms);
        Duration::from_millis(ms)
    }

    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        (self.heartbeat_timeout_ms > 0).then(|| Duration::from_millis(self.heartbeat_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_parse_config;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ListenerConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(4), Duration::from_millis(800));
        assert_eq!(config.backoff(10), Duration::from_millis(5_000));
        assert_eq!(config.backoff(u32::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn test_heartbeat_timeout_disabled_by_default() {
        let config = test_parse_config("");
        assert_eq!(config.listener.heartbeat_timeout(), None);

        let config = test_parse_config("[listener]\nheartbeat_timeout_ms = 250");
        assert_eq!(
            config.listener.heartbeat_timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_listener_overrides() {
        let config = test_parse_config("[listener]\nbatch_window_ms = 20\nresync_on_reconnect = false");
        assert_eq!(config.listener.batch_window(), Duration::from_millis(20));
        assert!(!config.listener.resync_on_reconnect);
        assert_eq!(config.listener.reconnect_max_ms, 5_000);
    }
}
