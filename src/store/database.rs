//! store::database
//!
//! Shared in-memory view of the index.
//!
//! # Invariants
//!
//! - The index is present only between a handle's open and close
//! - Every successful `write` bumps the generation and marks the view dirty
//! - A flush only marks the view clean if no write happened since the
//!   snapshot it persisted was taken
//!
//! # Example
//!
//! ```ignore
//! let repos = db.read(|index| index.repos.len())?;
//! db.write(|index| {
//!     index.repos.remove(&name);
//!     Ok(())
//! })?;
//! ```

use parking_lot::RwLock;

use super::schema::Index;
use super::StoreError;

#[derive(Debug, Default)]
struct DbState {
    index: Option<Index>,
    generation: u64,
    clean_generation: u64,
}

/// A dirty copy of the index taken for flushing.
#[derive(Debug)]
pub struct FlushSnapshot {
    pub index: Index,
    pub generation: u64,
}

/// Shared in-memory view of the index.
#[derive(Debug, Default)]
pub struct Database {
    state: RwLock<DbState>,
}

impl Database {
    /// Create an empty, unloaded database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a handle currently has the index loaded.
    pub fn is_loaded(&self) -> bool {
        self.state.read().index.is_some()
    }

    /// Whether writes are waiting to be flushed.
    pub fn is_dirty(&self) -> bool {
        let state = self.state.read();
        state.index.is_some() && state.generation != state.clean_generation
    }

    /// Run a read-only query against the loaded index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotOpen`] when no handle is open.
    pub fn read<T>(&self, f: impl FnOnce(&Index) -> T) -> Result<T, StoreError> {
        let state = self.state.read();
        state.index.as_ref().map(f).ok_or(StoreError::NotOpen)
    }

    /// Run a mutation against the loaded index.
    ///
    /// The closure works on a scratch copy that replaces the index only if
    /// the closure succeeds, so a failed operation never leaves a
    /// half-applied change behind.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotOpen`] when no handle is open, or the
    /// closure's own error.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&mut Index) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.write();
        let current = state.index.as_ref().ok_or(StoreError::NotOpen)?;
        let mut scratch = current.clone();
        let value = f(&mut scratch)?;
        state.index = Some(scratch);
        state.generation += 1;
        Ok(value)
    }

    /// Install a freshly loaded index.
    pub(crate) fn install(&self, index: Index) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.index.is_some() {
            return Err(StoreError::AlreadyOpen);
        }
        state.index = Some(index);
        state.clean_generation = state.generation;
        Ok(())
    }

    /// Copy the index if it has unflushed writes.
    pub(crate) fn dirty_snapshot(&self) -> Option<FlushSnapshot> {
        let state = self.state.read();
        if state.generation == state.clean_generation {
            return None;
        }
        state.index.as_ref().map(|index| FlushSnapshot {
            index: index.clone(),
            generation: state.generation,
        })
    }

    /// Record that everything up to `generation` is on disk.
    pub(crate) fn mark_flushed(&self, generation: u64) {
        let mut state = self.state.write();
        if generation > state.clean_generation {
            state.clean_generation = generation;
        }
    }

    /// Drop the loaded index, returning it for a final flush.
    pub(crate) fn unload(&self) -> Option<Index> {
        let mut state = self.state.write();
        state.clean_generation = state.generation;
        state.index.take()
    }
}
