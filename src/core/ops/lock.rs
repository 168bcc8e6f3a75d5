//! core::ops::lock
//!
//! Exclusive store lock.
//!
//! # Architecture
//!
//! The store lock ensures only one process has the index open at a time.
//! Other tools sharing the same root (CLI invocations, cron jobs) take the
//! same lock, so repogate must hold it only while it actually needs the
//! store.
//!
//! # Storage
//!
//! - `<root>/db/LOCK` - Lock file with OS-level exclusive lock
//!
//! # Invariants
//!
//! - Lock must be held for as long as the index is loaded
//! - Dropping the lock unlocks the file
//! - Acquisition polls with a deadline; a zero timeout makes a single attempt
//!
//! # Example
//!
//! ```ignore
//! use repogate::core::ops::lock::StoreLock;
//! use repogate::core::paths::StorePaths;
//! use std::time::Duration;
//!
//! let paths = StorePaths::new("/srv/repogate".into());
//! let lock = StoreLock::acquire(&paths, Duration::from_secs(5))?;
//!
//! // Read and write the index while holding the lock
//!
//! drop(lock);
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;

use crate::core::paths::StorePaths;

/// Polling interval when waiting for the lock (50ms).
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Store lock failures.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process held the lock for the whole wait.
    #[error("store is locked by another process (waited {waited_ms}ms)")]
    AlreadyLocked { waited_ms: u128 },

    /// The lock file or its directory could not be created.
    #[error("cannot create store lock: {0}")]
    CreateFailed(String),

    /// The OS refused the lock for a reason other than contention.
    #[error("store lock call failed: {0}")]
    AcquireFailed(String),

    /// Unlocking failed.
    #[error("cannot release store lock: {0}")]
    ReleaseFailed(String),
}

/// An exclusive lock on the store.
///
/// Released when dropped, even if the holder panics.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    /// `Some` while locked.
    file: Option<File>,
}

impl StoreLock {
    /// Acquire the store lock, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyLocked`] if the lock stayed busy until the deadline
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    /// - [`LockError::AcquireFailed`] if the OS lock call fails for another reason
    pub fn acquire(paths: &StorePaths, timeout: Duration) -> Result<Self, LockError> {
        let db_dir = paths.db_dir();
        fs::create_dir_all(&db_dir).map_err(|e| {
            LockError::CreateFailed(format!("cannot create {}: {}", db_dir.display(), e))
        })?;

        let path = paths.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        path,
                        file: Some(file),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LockError::AlreadyLocked {
                            waited_ms: started.elapsed().as_millis(),
                        });
                    }
                    thread::sleep(LOCK_POLL_INTERVAL.min(deadline - now));
                }
                Err(e) => return Err(LockError::AcquireFailed(e.to_string())),
            }
        }
    }

    /// Whether the OS lock is still held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// The lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock now and report the outcome. Dropping unlocks silently.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            file.unlock()
                .map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root() -> (TempDir, StorePaths) {
        let temp = TempDir::new().expect("create temp dir");
        let paths = StorePaths::new(temp.path().to_path_buf());
        (temp, paths)
    }

    #[test]
    fn acquire_creates_db_dir() {
        let (_temp, paths) = root();

        let lock = StoreLock::acquire(&paths, Duration::ZERO).expect("acquire lock");
        assert!(lock.is_held());
        assert_eq!(lock.path(), paths.lock_path());
        assert!(paths.db_dir().is_dir());
    }

    #[test]
    fn second_holder_is_refused() {
        let (_temp, paths) = root();

        let _held = StoreLock::acquire(&paths, Duration::ZERO).expect("first acquire");
        let result = StoreLock::acquire(&paths, Duration::ZERO);
        assert!(matches!(result, Err(LockError::AlreadyLocked { .. })));
    }

    #[test]
    fn acquire_waits_until_deadline() {
        let (_temp, paths) = root();

        let _held = StoreLock::acquire(&paths, Duration::ZERO).expect("first acquire");
        let started = Instant::now();
        let result = StoreLock::acquire(&paths, Duration::from_millis(120));
        assert!(matches!(result, Err(LockError::AlreadyLocked { .. })));
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn acquire_succeeds_once_holder_releases() {
        let (_temp, paths) = root();

        let holder = StoreLock::acquire(&paths, Duration::ZERO).expect("first acquire");
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            drop(holder);
        });

        let lock = StoreLock::acquire(&paths, Duration::from_secs(5)).expect("wait for lock");
        assert!(lock.is_held());
        releaser.join().unwrap();
    }

    #[test]
    fn drop_frees_lock() {
        let (_temp, paths) = root();

        drop(StoreLock::acquire(&paths, Duration::ZERO).expect("first acquire"));
        assert!(StoreLock::acquire(&paths, Duration::ZERO).is_ok());
    }

    #[test]
    fn release_is_idempotent() {
        let (_temp, paths) = root();

        let mut lock = StoreLock::acquire(&paths, Duration::ZERO).expect("acquire");
        lock.release().unwrap();
        lock.release().unwrap();
        assert!(!lock.is_held());
        assert!(StoreLock::acquire(&paths, Duration::ZERO).is_ok());
    }

    #[test]
    fn contention_error_reports_wait() {
        let err = LockError::AlreadyLocked { waited_ms: 10 };
        assert!(err.to_string().contains("locked"));
        assert!(err.to_string().contains("10ms"));
    }
}
