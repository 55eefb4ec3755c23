// src/cache/lock.rs

//! Cross-process advisory locks
//!
//! Path allocation and revision promotion for one recipe run under an
//! exclusive lock on `<root>/locks/<hash>.lock`. The lock is released when the
//! guard is dropped.

use crate::error::{Error, Result};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(10);
const MAX_RETRY_DELAY: Duration = Duration::from_millis(500);
const SLOW_LOCK_THRESHOLD: Duration = Duration::from_secs(2);

/// Held advisory lock
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Lock file guarding every revision of `coordinates`
pub fn lock_path(root: &Path, coordinates: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(coordinates.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    root.join("locks").join(format!("{}.lock", &digest[..16]))
}

/// Take the exclusive lock at `lock_path`, retrying with exponential backoff
/// until `timeout` has elapsed
pub fn acquire(lock_path: &Path, timeout: Duration, description: &str) -> Result<LockGuard> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let start = Instant::now();
    let mut retry_delay = INITIAL_RETRY_DELAY;
    let mut reported = false;

    loop {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired lock {} ({})", lock_path.display(), description);
                return Ok(LockGuard {
                    file,
                    path: lock_path.to_path_buf(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    return Err(Error::LockTimeout {
                        path: lock_path.to_path_buf(),
                        description: description.to_string(),
                    });
                }

                if !reported && elapsed >= SLOW_LOCK_THRESHOLD {
                    warn!(
                        "Waiting for lock on {} ({})...",
                        lock_path.display(),
                        description
                    );
                    reported = true;
                }

                thread::sleep(retry_delay);
                retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_is_stable() {
        let root = Path::new("/cache");
        let a = lock_path(root, "zlib/1.2.11");
        assert_eq!(a, lock_path(root, "zlib/1.2.11"));
        assert_ne!(a, lock_path(root, "zlib/1.2.12"));
        assert!(a.starts_with("/cache/locks"));
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), "zlib/1.2.11");

        let guard = acquire(&path, Duration::from_secs(1), "test").unwrap();
        assert!(guard.path().exists());
        drop(guard);

        // Released locks can be taken again
        acquire(&path, Duration::from_secs(1), "test").unwrap();
    }

    #[test]
    fn test_held_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), "zlib/1.2.11");

        let _held = acquire(&path, Duration::from_secs(1), "holder").unwrap();
        let result = acquire(&path, Duration::from_millis(50), "waiter");
        assert!(matches!(result, Err(Error::LockTimeout { .. })));
    }
}
