//! `[recompute]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [recompute]
//! timeout_ms = 15000          # Upper bound on one recompute attempt
//! reprocess_delay_ms = 100    # Wait before a coalesced rerun
//! slow_query_ms = 300         # Log recomputes slower than this
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Recompute pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecomputeConfig {
    /// Timeout of one attempt. The store call is not cancelled; its result
    /// is discarded.
    pub timeout_ms: u64,

    /// Delay before rerunning a recompute that was triggered while running.
    pub reprocess_delay_ms: u64,

    /// Recomputes slower than this are logged.
    pub slow_query_ms: u64,
}

impl Default for RecomputeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            reprocess_delay_ms: 100,
            slow_query_ms: 300,
        }
    }
}

impl RecomputeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reprocess_delay(&self) -> Duration {
        Duration::from_millis(self.reprocess_delay_ms)
    }

    pub fn slow_query(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }
}
