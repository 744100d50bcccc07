//! Engine configuration, usually loaded from `livequery.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # Configuration section definitions
//! │   ├── clients    # [clients]
//! │   ├── diff       # [diff]
//! │   ├── listener   # [listener]
//! │   └── recompute  # [recompute]
//! ├── types/         # Utility types
//! │   ├── error      # ConfigError, ConfigDiagnostics
//! │   └── handle     # Hot-reloadable ConfigHandle
//! └── mod.rs         # LiveConfig (this file)
//! ```
//!
//! Every section is optional. Missing fields take their defaults, unknown
//! fields are reported and ignored.

pub mod section;
pub mod types;

pub use section::{ClientsConfig, DiffConfig, ListenerConfig, RecomputeConfig};
pub use types::{ConfigDiagnostic, ConfigDiagnostics, ConfigError, ConfigHandle};

use crate::log;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub recompute: RecomputeConfig,
    pub diff: DiffConfig,
    pub listener: ListenerConfig,
    pub clients: ClientsConfig,
}

impl LiveConfig {
    /// Parse and validate configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, warning about unknown fields.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::parse_file(&content, path)
    }

    pub(crate) fn parse_file(content: &str, path: &Path) -> Result<Self> {
        let (config, ignored) = Self::parse_with_ignored(content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })
        .map_err(ConfigError::Toml)?;
        Ok((config, ignored))
    }

    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring: {}", display_path, fields.join(", "));
    }

    /// Validate field values.
    ///
    /// Collects all validation errors and returns them at once.
    pub fn validate(&self) -> Result<()> {
        let mut diag = ConfigDiagnostics::new();

        if self.recompute.timeout_ms == 0 {
            diag.error("recompute.timeout_ms", "must be greater than 0");
        }
        if self.listener.reconnect_initial_ms == 0 {
            diag.error("listener.reconnect_initial_ms", "must be greater than 0");
        }
        if self.listener.reconnect_max_ms < self.listener.reconnect_initial_ms {
            diag.error_with_hint(
                "listener.reconnect_max_ms",
                "smaller than listener.reconnect_initial_ms",
                format!(
                    "set reconnect_max_ms to at least {}",
                    self.listener.reconnect_initial_ms
                ),
            );
        }
        if self.clients.sweep_interval_ms == 0 {
            diag.error("clients.sweep_interval_ms", "must be greater than 0");
        }
        if self.clients.heartbeat_timeout_ms < self.clients.sweep_interval_ms {
            diag.error_with_hint(
                "clients.heartbeat_timeout_ms",
                "shorter than clients.sweep_interval_ms",
                "clients would be dropped before their first heartbeat is checked",
            );
        }

        diag.into_result()
            .map_err(|e| ConfigError::Diagnostics(e).into())
    }
}

// ============================================================================
// Test Helpers (available to all modules via `use crate::config::test_*`)
// ============================================================================

/// Parse config from `extra`.
/// Panics if there are unknown fields (to catch config typos in tests).
#[cfg(test)]
pub fn test_parse_config(extra: &str) -> LiveConfig {
    let (parsed, ignored) = LiveConfig::parse_with_ignored(extra).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}

// ============================================================================
// tests
// ============================================================================
