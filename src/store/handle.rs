//! store::handle
//!
//! Store handles: the only code that touches `index.json` and the lock.
//!
//! # Seams
//!
//! [`StoreOpener`] and [`OpenStore`] are the boundary between the gate
//! and the storage backend. The gate only ever sees these traits, which
//! lets tests substitute [`crate::store::mock::MockStoreOpener`].
//!
//! # Lifecycle
//!
//! ```text
//! open:  take OS lock -> read index.json -> install into Database
//! flush: copy dirty index -> write index.json.tmp -> fsync -> rename
//! close: flush -> unload Database -> release OS lock
//! ```

use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::database::Database;
use super::schema::Index;
use super::StoreError;
use crate::core::ops::StoreLock;
use crate::core::paths::StorePaths;

/// An open store. Dropping it without `close` releases the OS lock but
/// discards unflushed writes.
pub trait OpenStore: Send {
    /// Persist buffered writes without releasing the lock.
    fn flush(&mut self) -> Result<(), StoreError>;

    /// Persist buffered writes, unload the index and release the lock.
    ///
    /// The handle is consumed even when this fails.
    fn close(self: Box<Self>) -> Result<(), StoreError>;
}

/// Opens the store under its exclusive lock.
pub trait StoreOpener: Send + Sync {
    /// Open the store.
    fn open(&self) -> Result<Box<dyn OpenStore>, StoreError>;
}

/// Opens the on-disk store rooted at a [`StorePaths`].
#[derive(Debug, Clone)]
pub struct DiskStoreOpener {
    paths: StorePaths,
    db: Arc<Database>,
    open_timeout: Duration,
}

impl DiskStoreOpener {
    /// Create an opener that loads into `db`, waiting up to `open_timeout`
    /// for the OS lock.
    pub fn new(paths: StorePaths, db: Arc<Database>, open_timeout: Duration) -> Self {
        Self {
            paths,
            db,
            open_timeout,
        }
    }
}

impl StoreOpener for DiskStoreOpener {
    fn open(&self) -> Result<Box<dyn OpenStore>, StoreError> {
        let handle = StoreHandle::open(&self.paths, Arc::clone(&self.db), self.open_timeout)?;
        Ok(Box::new(handle))
    }
}

/// The open on-disk store.
#[derive(Debug)]
pub struct StoreHandle {
    paths: StorePaths,
    db: Arc<Database>,
    lock: StoreLock,
}

impl StoreHandle {
    /// Take the lock and load the index into `db`.
    ///
    /// A missing index file is treated as an empty store.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Lock`] if the lock cannot be taken in time
    /// - [`StoreError::Corrupt`] if `index.json` cannot be parsed
    /// - [`StoreError::AlreadyOpen`] if `db` is already loaded
    pub fn open(
        paths: &StorePaths,
        db: Arc<Database>,
        open_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let lock = StoreLock::acquire(paths, open_timeout)?;
        let index = read_index(paths)?;
        db.install(index)?;

        info!(root = %paths.root().display(), "store opened");
        Ok(Self {
            paths: paths.clone(),
            db,
            lock,
        })
    }

    fn write_index(&self, index: &Index) -> Result<(), StoreError> {
        let path = self.paths.index_path();
        let temp_path = path.with_extension("json.tmp");

        let contents = serde_json::to_vec_pretty(index).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let mut file = fs::File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;
        file.write_all(&contents)
            .map_err(|e| StoreError::io(&temp_path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&temp_path, e))?;
        fs::rename(&temp_path, &path).map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }
}

impl OpenStore for StoreHandle {
    fn flush(&mut self) -> Result<(), StoreError> {
        let Some(snapshot) = self.db.dirty_snapshot() else {
            return Ok(());
        };
        self.write_index(&snapshot.index)?;
        self.db.mark_flushed(snapshot.generation);
        debug!(generation = snapshot.generation, "index flushed");
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), StoreError> {
        let flushed = self.flush();
        if let Err(e) = &flushed {
            error!(error = %e, "final flush failed; unflushed writes are lost");
        }
        self.db.unload();
        let released = self.lock.release().map_err(StoreError::from);
        info!(root = %self.paths.root().display(), "store closed");
        flushed.and(released)
    }
}

fn read_index(paths: &StorePaths) -> Result<Index, StoreError> {
    let path = paths.index_path();
    match fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path,
            message: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::default()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}
