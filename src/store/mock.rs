//! store::mock
//!
//! In-memory store opener for deterministic testing.
//!
//! # Design
//!
//! The mock counts opens, closes and flushes, can be told to fail the next
//! N operations of each kind, and detects overlapping open/close calls.
//! An optional delay inside open/close widens the window in which an
//! unserialized caller would be caught overlapping.
//!
//! When built with [`MockStoreOpener::with_database`], opening installs an
//! empty index into the database and closing unloads it, so handlers can
//! run against the mock exactly as they would against disk.
//!
//! # Example
//!
//! ```
//! use repogate::store::mock::MockStoreOpener;
//! use repogate::store::{OpenStore, StoreOpener};
//!
//! let mock = MockStoreOpener::new();
//! let handle = mock.open().unwrap();
//! assert!(mock.is_open());
//! handle.close().unwrap();
//! assert_eq!(mock.stats().opens, 1);
//! assert_eq!(mock.stats().closes, 1);
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::database::Database;
use super::handle::{OpenStore, StoreOpener};
use super::schema::Index;
use super::StoreError;

/// Counters observed by the mock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub opens: u64,
    pub closes: u64,
    pub flushes: u64,
    pub failed_opens: u64,
    pub failed_closes: u64,
    pub failed_flushes: u64,
    /// Times an open or close started while another was in progress.
    pub overlaps: u64,
    /// Times `open` was called while a handle was already open.
    pub double_opens: u64,
}

#[derive(Debug, Default)]
struct MockInner {
    stats: MockStats,
    open: bool,
    in_transition: bool,
    fail_opens: u32,
    fail_closes: u32,
    fail_flushes: u32,
    delay: Duration,
}

/// Mock opener.
///
/// Thread-safe; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockStoreOpener {
    inner: Arc<Mutex<MockInner>>,
    db: Option<Arc<Database>>,
}

impl MockStoreOpener {
    /// Create a mock with no failures and no delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that loads an empty index into `db` on open.
    pub fn with_database(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::default(),
            db: Some(db),
        }
    }

    /// Sleep this long inside every open and close.
    pub fn set_delay(&self, delay: Duration) {
        self.inner.lock().delay = delay;
    }

    /// Fail the next `n` opens.
    pub fn fail_next_opens(&self, n: u32) {
        self.inner.lock().fail_opens = n;
    }

    /// Fail the next `n` closes.
    pub fn fail_next_closes(&self, n: u32) {
        self.inner.lock().fail_closes = n;
    }

    /// Fail the next `n` flushes.
    pub fn fail_next_flushes(&self, n: u32) {
        self.inner.lock().fail_flushes = n;
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> MockStats {
        self.inner.lock().stats
    }

    /// Whether a handle is currently open.
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn begin_transition(&self) -> Duration {
        let mut inner = self.inner.lock();
        if inner.in_transition {
            inner.stats.overlaps += 1;
        }
        inner.in_transition = true;
        inner.delay
    }

    fn end_transition(&self) {
        self.inner.lock().in_transition = false;
    }
}

impl StoreOpener for MockStoreOpener {
    fn open(&self) -> Result<Box<dyn OpenStore>, StoreError> {
        let delay = self.begin_transition();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let result = {
            let mut inner = self.inner.lock();
            if inner.open {
                inner.stats.double_opens += 1;
            }
            if inner.fail_opens > 0 {
                inner.fail_opens -= 1;
                inner.stats.failed_opens += 1;
                Err(StoreError::Injected("open".into()))
            } else {
                inner.open = true;
                inner.stats.opens += 1;
                Ok(())
            }
        };
        if result.is_ok() {
            if let Some(db) = &self.db {
                if let Err(e) = db.install(Index::default()) {
                    self.inner.lock().open = false;
                    self.end_transition();
                    return Err(e);
                }
            }
        }
        self.end_transition();

        result.map(|()| {
            Box::new(MockHandle {
                opener: self.clone(),
            }) as Box<dyn OpenStore>
        })
    }
}

/// Handle returned by [`MockStoreOpener`].
#[derive(Debug)]
pub struct MockHandle {
    opener: MockStoreOpener,
}

impl OpenStore for MockHandle {
    fn flush(&mut self) -> Result<(), StoreError> {
        let mut inner = self.opener.inner.lock();
        if inner.fail_flushes > 0 {
            inner.fail_flushes -= 1;
            inner.stats.failed_flushes += 1;
            return Err(StoreError::Injected("flush".into()));
        }
        inner.stats.flushes += 1;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        let delay = self.opener.begin_transition();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        if let Some(db) = &self.opener.db {
            db.unload();
        }

        let result = {
            let mut inner = self.opener.inner.lock();
            inner.open = false;
            inner.stats.closes += 1;
            if inner.fail_closes > 0 {
                inner.fail_closes -= 1;
                inner.stats.failed_closes += 1;
                Err(StoreError::Injected("close".into()))
            } else {
                Ok(())
            }
        };
        self.opener.end_transition();
        result
    }
}
