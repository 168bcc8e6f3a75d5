//! gate
//!
//! Mediates every request's access to the exclusively-locked store.
//!
//! # Architecture
//!
//! ```text
//! request ──▶ request_gate ──▶ GateArbiter (worker thread) ──▶ StoreOpener
//!                 │                   │
//!                 ▼                   ▼
//!              handler         Closed / Open(n)
//! ```
//!
//! - [`arbiter`]: the single serialization point for open/close decisions
//! - [`lease`]: scoped acquisition that always pairs with a release
//! - [`request`]: axum middleware applying the lease to each request
//! - [`flusher`]: periodic flush when the store is held open
//! - [`modes`]: startup choice between the two strategies

pub mod arbiter;
pub mod flusher;
pub mod lease;
pub mod modes;
pub mod request;

pub use arbiter::{ArbiterError, ArbiterState, ArbiterStatus, GateArbiter, Token};
pub use flusher::{IdleFlusher, SharedHandle};
pub use lease::Lease;
pub use modes::{AccessSettings, ModeError, StoreAccess, StoreMode};
pub use request::request_gate;
