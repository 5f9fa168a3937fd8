//! Engine configuration.
//!
//! This module provides the [`EngineConfig`] struct which stores tunables
//! for the storage engine. Configuration is persisted as TOML next to the
//! local cache database (typically `<data-dir>/notecask/engine.toml`).
//!
//! All fields have conservative defaults; a missing config file is
//! equivalent to `EngineConfig::default()`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NotecaskError, Result};

/// Default log file rollover threshold: 8 MiB.
const DEFAULT_ROLLOVER_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Default number of applied updates between file snapshots.
const DEFAULT_SNAPSHOT_EVERY_UPDATES: u32 = 200;

/// Default minimum age of the newest snapshot before writing another, in
/// milliseconds (one hour).
const DEFAULT_SNAPSHOT_MIN_AGE_MS: i64 = 60 * 60 * 1000;

/// Default interval between peer-log sync passes, in milliseconds.
const DEFAULT_SYNC_INTERVAL_MS: u64 = 5_000;

/// Default number of records applied between cancellation checks.
const DEFAULT_SYNC_BATCH_SIZE: usize = 64;

/// Tunables for the storage engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Size in bytes after which a log writer rolls over to a new file.
    #[serde(default = "default_rollover_threshold")]
    pub rollover_threshold: u64,

    /// Write a file snapshot after this many locally applied updates.
    #[serde(default = "default_snapshot_every_updates")]
    pub snapshot_every_updates: u32,

    /// Do not write a new snapshot if the newest complete one is younger
    /// than this many milliseconds, regardless of update count.
    #[serde(default = "default_snapshot_min_age_ms")]
    pub snapshot_min_age_ms: i64,

    /// Compress snapshot files with zstd (`.snapshot.zst`). Readers accept
    /// both forms regardless of this setting.
    #[serde(default)]
    pub compress_snapshots: bool,

    /// Interval between peer-log sync passes, in milliseconds.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Number of records applied per peer file between cancellation checks.
    #[serde(default = "default_sync_batch_size")]
    pub sync_batch_size: usize,
}

fn default_rollover_threshold() -> u64 {
    DEFAULT_ROLLOVER_THRESHOLD
}

fn default_snapshot_every_updates() -> u32 {
    DEFAULT_SNAPSHOT_EVERY_UPDATES
}

fn default_snapshot_min_age_ms() -> i64 {
    DEFAULT_SNAPSHOT_MIN_AGE_MS
}

fn default_sync_interval_ms() -> u64 {
    DEFAULT_SYNC_INTERVAL_MS
}

fn default_sync_batch_size() -> usize {
    DEFAULT_SYNC_BATCH_SIZE
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rollover_threshold: DEFAULT_ROLLOVER_THRESHOLD,
            snapshot_every_updates: DEFAULT_SNAPSHOT_EVERY_UPDATES,
            snapshot_min_age_ms: DEFAULT_SNAPSHOT_MIN_AGE_MS,
            compress_snapshots: false,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            sync_batch_size: DEFAULT_SYNC_BATCH_SIZE,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; a present but malformed file is
    /// an error (silent fallback would hide operator typos).
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(NotecaskError::FileRead {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Persist configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| NotecaskError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.rollover_threshold, 8 * 1024 * 1024);
        assert!(!config.compress_snapshots);
        assert!(config.sync_batch_size > 0);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("engine.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let config = EngineConfig {
            rollover_threshold: 1024,
            compress_snapshots: true,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "rollover_threshold = 4096\n").unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.rollover_threshold, 4096);
        assert_eq!(
            loaded.snapshot_every_updates,
            EngineConfig::default().snapshot_every_updates
        );
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "rollover_threshold = \"not a number\"").unwrap();

        assert!(EngineConfig::load(&path).is_err());
    }
}
