//! core
//!
//! Core domain types, configuration, and operations for repogate.
//!
//! # Modules
//!
//! - [`types`] - Strong types: ResourceName, PackageKey, UtcTimestamp
//! - [`ops`] - Exclusive store locking
//! - [`config`] - Configuration schema and loading
//! - [`paths`] - Centralized path routing for store storage
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid names from reaching the filesystem
//! - Schemas are strict and reject unknown fields

pub mod config;
pub mod ops;
pub mod paths;
pub mod types;
