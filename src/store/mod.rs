//! store
//!
//! The exclusively-locked metadata index.
//!
//! # Modules
//!
//! - [`schema`] - Index records
//! - [`database`] - Shared in-memory view of the index used by handlers
//! - [`handle`] - Store handles: open, flush and close under the OS lock
//! - [`mock`] - In-memory opener for deterministic tests
//! - [`pool`] - Importing staged package files
//! - [`publish`] - Published `Packages` indexes
//!
//! # Architecture
//!
//! Two objects split the store:
//!
//! - A [`handle::StoreHandle`] holds the OS lock and is the only thing that
//!   reads or writes `index.json`. Exactly one component owns it: the gate
//!   arbiter in reference-counted mode, the persistent holder otherwise.
//! - The [`database::Database`] is what handlers see. It holds the loaded
//!   index while a handle is open and refuses access otherwise, so a handler
//!   running outside an acquired window fails loudly instead of reading
//!   stale state.

pub mod database;
pub mod handle;
pub mod mock;
pub mod pool;
pub mod publish;
pub mod schema;

use std::path::PathBuf;

use thiserror::Error;

use crate::core::ops::LockError;

pub use database::Database;
pub use handle::{DiskStoreOpener, OpenStore, StoreHandle, StoreOpener};
pub use schema::Index;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The index is not loaded; no handle is open.
    #[error("store is not open")]
    NotOpen,

    /// A handle is already open against this database.
    #[error("store is already open")]
    AlreadyOpen,

    /// Failed to take the OS lock.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Filesystem error while reading or writing store files.
    #[error("store i/o error at '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The index file exists but cannot be parsed.
    #[error("corrupt index at '{path}': {message}")]
    Corrupt { path: PathBuf, message: String },

    /// A named record does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// A named record already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// The record is referenced by something else.
    #[error("{0}")]
    InUse(String),

    /// The request makes no sense against the current index.
    #[error("{0}")]
    Invalid(String),

    /// Injected failure (mock opener only).
    #[error("injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn not_found(kind: &'static str, name: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, name: impl std::fmt::Display) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.to_string(),
        }
    }
}
