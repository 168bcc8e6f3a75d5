//! gate::modes
//!
//! Store access modes and the startup decision between them.
//!
//! # Modes
//!
//! - [`StoreMode::RefCounted`] (`--no-lock`): the store is opened when the
//!   first in-flight request needs it and closed when the last one is done,
//!   leaving the lock free for other tools between bursts. Every route is
//!   wrapped in the request gate.
//! - [`StoreMode::Persistent`] (default): the store is opened once before
//!   serving and held until shutdown; the idle flusher persists writes.
//!
//! The mode is resolved once at startup and never changes.
//!
//! # Example
//!
//! ```ignore
//! use repogate::gate::modes::{StoreAccess, StoreMode};
//!
//! let mode = StoreMode::resolve(config.no_lock());
//! let access = StoreAccess::start(mode, opener, settings).await?;
//! // ... serve ...
//! access.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info};

use super::arbiter::GateArbiter;
use super::flusher::{IdleFlusher, SharedHandle};
use crate::store::{StoreError, StoreOpener};

/// Errors from starting store access.
#[derive(Debug, Error)]
pub enum ModeError {
    /// The persistent store could not be opened at startup.
    #[error("failed to open store at startup: {0}")]
    OpenAtStartup(#[source] StoreError),

    /// The arbiter worker thread could not be spawned.
    #[error("failed to start store arbiter: {0}")]
    SpawnArbiter(#[source] std::io::Error),
}

/// How the service holds the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Open per burst of overlapping requests.
    RefCounted,
    /// Open for the whole process lifetime.
    Persistent,
}

impl StoreMode {
    /// Resolve the mode from the `no_lock` setting.
    pub fn resolve(no_lock: bool) -> Self {
        if no_lock {
            Self::RefCounted
        } else {
            Self::Persistent
        }
    }

    /// Whether every request must pass through the gate.
    pub fn gates_requests(&self) -> bool {
        matches!(self, Self::RefCounted)
    }
}

impl std::fmt::Display for StoreMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RefCounted => "ref-counted",
            Self::Persistent => "persistent",
        })
    }
}

/// Timing knobs for store access.
#[derive(Debug, Clone, Copy)]
pub struct AccessSettings {
    /// How long a request waits for the arbiter.
    pub acquire_timeout: Duration,
    /// Flush period in persistent mode.
    pub flush_interval: Duration,
}

/// The store held open for the process lifetime.
pub struct PersistentStore {
    handle: SharedHandle,
    flusher: IdleFlusher,
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("open", &self.handle.lock().is_some())
            .field("flusher", &self.flusher)
            .finish()
    }
}

impl PersistentStore {
    /// Open the store and start the idle flusher.
    pub async fn open(
        opener: Arc<dyn StoreOpener>,
        flush_interval: Duration,
    ) -> Result<Self, ModeError> {
        let opened = tokio::task::spawn_blocking(move || opener.open())
            .await
            .map_err(|e| ModeError::OpenAtStartup(StoreError::Invalid(e.to_string())))?
            .map_err(ModeError::OpenAtStartup)?;

        let handle: SharedHandle = Arc::new(Mutex::new(Some(opened)));
        let flusher = IdleFlusher::spawn(Arc::clone(&handle), flush_interval);
        info!("store held open for process lifetime");
        Ok(Self { handle, flusher })
    }

    /// Stop flushing, then close the store (which flushes one last time).
    pub async fn close(self) -> Result<(), StoreError> {
        self.flusher.stop().await;
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => tokio::task::spawn_blocking(move || handle.close())
                .await
                .map_err(|e| StoreError::Invalid(e.to_string()))?,
            None => Ok(()),
        }
    }
}

/// Store access as selected at startup.
#[derive(Debug)]
pub enum StoreAccess {
    /// Reference-counted: the arbiter opens and closes the store.
    RefCounted(GateArbiter),
    /// Persistent: the store is open until shutdown.
    Persistent(PersistentStore),
}

impl StoreAccess {
    /// Start the selected mode.
    ///
    /// In persistent mode this opens the store before returning, so a
    /// failure here means the service must not start serving.
    pub async fn start(
        mode: StoreMode,
        opener: Arc<dyn StoreOpener>,
        settings: AccessSettings,
    ) -> Result<Self, ModeError> {
        info!(mode = %mode, "starting store access");
        match mode {
            StoreMode::RefCounted => GateArbiter::spawn(opener, settings.acquire_timeout)
                .map(Self::RefCounted)
                .map_err(ModeError::SpawnArbiter),
            StoreMode::Persistent => PersistentStore::open(opener, settings.flush_interval)
                .await
                .map(Self::Persistent),
        }
    }

    /// The mode in effect.
    pub fn mode(&self) -> StoreMode {
        match self {
            Self::RefCounted(_) => StoreMode::RefCounted,
            Self::Persistent(_) => StoreMode::Persistent,
        }
    }

    /// The arbiter, in reference-counted mode.
    pub fn arbiter(&self) -> Option<&GateArbiter> {
        match self {
            Self::RefCounted(arbiter) => Some(arbiter),
            Self::Persistent(_) => None,
        }
    }

    /// Drain to a closed store.
    pub async fn shutdown(self) {
        match self {
            Self::RefCounted(arbiter) => arbiter.shutdown().await,
            Self::Persistent(store) => {
                if let Err(e) = store.close().await {
                    error!(error = %e, "closing persistent store failed");
                }
            }
        }
        info!("store access shut down");
    }
}
