//! `[diff]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [diff]
//! offload_threshold = 4096    # JSON nodes before diffing on the worker pool
//! early_stop = true           # Lazy old-array indexing on net deletions
//! ```

use serde::{Deserialize, Serialize};

use crate::diff::DiffOptions;

/// Diff engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Combined node count of old and new payload above which the diff runs
    /// on the rayon pool.
    pub offload_threshold: usize,

    /// Index the old array lazily when the new one is shorter.
    pub early_stop: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            offload_threshold: 4096,
            early_stop: true,
        }
    }
}

impl DiffConfig {
    pub fn options(&self) -> DiffOptions {
        DiffOptions {
            early_stop: self.early_stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_diff_config() {
        let config = test_parse_config("[diff]\noffload_threshold = 10\nearly_stop = false");
        assert_eq!(config.diff.offload_threshold, 10);
        assert!(!config.diff.options().early_stop);
    }

    #[test]
    fn test_diff_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.diff.offload_threshold, 4096);
        assert!(config.diff.early_stop);
    }
}
