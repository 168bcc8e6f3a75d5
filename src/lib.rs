//! repogate - HTTP service for package-repository management
//!
//! repogate exposes local repos, mirrors, snapshots and publications over a
//! JSON API. All metadata lives in a single on-disk index guarded by an
//! exclusive OS lock, so only one process can hold it open at a time.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface layer (parses args, starts the server)
//! - [`core`] - Strong types, configuration, paths and the store lock
//! - [`store`] - The index: schema, handles, pool import and publishing
//! - [`gate`] - Decides when the store is open: per request burst or always
//! - [`server`] - axum routes, error mapping and the serve loop
//! - [`observability`] - Logging setup
//!
//! # Correctness Invariants
//!
//! 1. At most one store handle is open at any instant
//! 2. A request handler only runs while the store is open
//! 3. In reference-counted mode the store is closed whenever no request is
//!    in flight
//! 4. Every acquired token is released exactly once, including when the
//!    handler panics

pub mod cli;
pub mod core;
pub mod gate;
pub mod observability;
pub mod server;
pub mod store;
