//! core::ops
//!
//! Store locking.
//!
//! # Modules
//!
//! - [`lock`] - Exclusive store lock
//!
//! # Architecture
//!
//! The lock is only ever taken by a store handle while it opens the
//! index; nothing else in the crate touches the lock file. See
//! [`crate::store::handle`] for the owner and [`crate::gate`] for the
//! code deciding when a handle exists.

pub mod lock;

pub use lock::{LockError, StoreLock};
