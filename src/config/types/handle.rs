//! Shared config with atomic reload support.
//!
//! Uses `arc-swap` for lock-free reads and atomic config replacement, so the
//! coordinator and listeners always see a complete snapshot while the file is
//! reloaded underneath them.

use crate::config::{ConfigError, LiveConfig};
use crate::core::compute;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cloneable handle to the live configuration.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwap<LiveConfig>>,
    source: Option<Arc<PathBuf>>,
    /// Hash of the file content the current config was parsed from.
    hash: Arc<AtomicU64>,
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(LiveConfig::default())
    }
}

impl ConfigHandle {
    /// Handle over an in-memory config with no backing file.
    pub fn new(config: LiveConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            source: None,
            hash: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Load `path` and keep it as the reload source.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path)
            .map_err(|err| ConfigError::Io(path.clone(), err))?;
        let config = LiveConfig::parse_file(&content, &path)?;

        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            hash: Arc::new(AtomicU64::new(compute(content.as_bytes()))),
            source: Some(Arc::new(path)),
        })
    }

    #[inline]
    pub fn load(&self) -> Arc<LiveConfig> {
        self.current.load_full()
    }

    /// Replace the config in place. Subsequent `load` calls see `config`.
    pub fn store(&self, config: LiveConfig) {
        self.current.store(Arc::new(config));
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref().map(PathBuf::as_path)
    }

    /// Reload from the source file if its content changed.
    ///
    /// Returns `Ok(true)` if config was updated, `Ok(false)` if unchanged or
    /// there is no source file. An invalid file, or one changing the
    /// manager's timer settings, leaves the current config untouched.
    pub fn reload(&self) -> Result<bool> {
        let Some(path) = self.source.as_deref() else {
            return Ok(false);
        };

        let content = fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.clone(), err))?;
        let new_hash = compute(content.as_bytes());
        if new_hash == self.hash.load(Ordering::Relaxed) {
            return Ok(false);
        }

        let config = LiveConfig::parse_file(&content, path)?;
        let fields = self.load().clients.startup_changes(&config.clients);
        if !fields.is_empty() {
            return Err(ConfigError::RestartRequired {
                path: path.clone(),
                fields,
            }
            .into());
        }
        self.current.store(Arc::new(config));
        self.hash.store(new_hash, Ordering::Relaxed);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_in_memory_handle() {
        let handle = ConfigHandle::default();
        assert_eq!(handle.load().recompute.timeout_ms, 15_000);
        assert!(handle.source().is_none());
        assert!(!handle.reload().unwrap());

        let mut config = LiveConfig::default();
        config.recompute.timeout_ms = 20;
        handle.store(config);
        assert_eq!(handle.load().recompute.timeout_ms, 20);
    }

    #[test]
    fn test_clones_share_state() {
        let handle = ConfigHandle::default();
        let other = handle.clone();
        let mut config = LiveConfig::default();
        config.diff.early_stop = false;
        other.store(config);
        assert!(!handle.load().diff.early_stop);
    }

    #[test]
    fn test_reload_only_on_change() {
        let file = write_config("[recompute]\ntimeout_ms = 100\n");
        let handle = ConfigHandle::from_path(file.path()).unwrap();
        assert_eq!(handle.load().recompute.timeout_ms, 100);

        assert!(!handle.reload().unwrap());

        fs::write(file.path(), "[recompute]\ntimeout_ms = 250\n").unwrap();
        assert!(handle.reload().unwrap());
        assert_eq!(handle.load().recompute.timeout_ms, 250);
        assert!(!handle.reload().unwrap());
    }

    #[test]
    fn test_invalid_reload_keeps_previous() {
        let file = write_config("[diff]\noffload_threshold = 8\n");
        let handle = ConfigHandle::from_path(file.path()).unwrap();

        fs::write(file.path(), "[recompute]\ntimeout_ms = 0\n").unwrap();
        assert!(handle.reload().is_err());
        assert_eq!(handle.load().diff.offload_threshold, 8);
    }

    #[test]
    fn test_reload_refuses_timer_changes() {
        let file = write_config("[clients]\nsweep_interval_ms = 100\n");
        let handle = ConfigHandle::from_path(file.path()).unwrap();

        fs::write(file.path(), "[clients]\nsweep_interval_ms = 20\n").unwrap();
        let err = handle.reload().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::RestartRequired { fields, .. }) if fields == &["clients.sweep_interval_ms"]
        ));
        assert_eq!(handle.load().clients.sweep_interval_ms, 100);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigHandle::from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("IO error"));
    }
}
