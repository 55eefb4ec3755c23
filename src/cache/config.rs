// src/cache/config.rs

//! Cache configuration
//!
//! Everything has a sensible default so `CacheConfig::new(root)` is enough for
//! most callers. A JSON file may override individual fields.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum number of hex characters of a hash used as a folder name
pub const HASH_MIN_SIZE: usize = 6;

/// Length of a hex SHA-256 digest, the longest possible folder name
pub const HASH_MAX_SIZE: usize = 64;

/// File name of the cache index inside the cache root
pub const DB_FILENAME: &str = "cache.sqlite3";

/// Busy timeout for index connections (milliseconds)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 1000;

/// Maximum wait on a per-reference advisory lock (milliseconds)
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;

/// Settings for a [`Cache`](super::Cache)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub db_filename: String,
    pub hash_min_size: usize,
    pub busy_timeout_ms: u64,
    pub lock_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            db_filename: DB_FILENAME.to_string(),
            hash_min_size: HASH_MIN_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl CacheConfig {
    /// Default configuration rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    ///
    /// A relative `root` is resolved against the directory of the file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::InitError(format!("Invalid cache config {}: {}", path.display(), e))
        })?;

        if config.root.is_relative() {
            if let Some(dir) = path.parent() {
                config.root = dir.join(&config.root);
            }
        }
        config.validate()?;

        Ok(config)
    }

    /// Reject values that would make folder allocation unsafe
    pub fn validate(&self) -> Result<()> {
        if !(1..=HASH_MAX_SIZE).contains(&self.hash_min_size) {
            return Err(Error::InitError(format!(
                "hash_min_size must be between 1 and {}, got {}",
                HASH_MAX_SIZE, self.hash_min_size
            )));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(&self.db_filename)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
