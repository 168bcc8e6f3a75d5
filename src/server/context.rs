//! Shared service context.

use std::sync::Arc;

use crate::core::paths::StorePaths;
use crate::gate::StoreMode;
use crate::store::Database;

/// Everything a handler needs, built once at startup.
///
/// Handlers reach the store only through [`Database`]; the handle that
/// owns the lock stays with the arbiter or the persistent holder.
#[derive(Debug)]
pub struct ServiceContext {
    paths: StorePaths,
    db: Arc<Database>,
    mode: StoreMode,
}

impl ServiceContext {
    pub fn new(paths: StorePaths, db: Arc<Database>, mode: StoreMode) -> Self {
        Self { paths, db, mode }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }
}

/// Axum state type.
pub type SharedContext = Arc<ServiceContext>;
