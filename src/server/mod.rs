//! HTTP server.
//!
//! # Startup
//!
//! ```text
//! config ─▶ StorePaths ─▶ StoreAccess::start(mode) ─▶ router ─▶ axum::serve
//!                                                                  │
//!                              StoreAccess::shutdown ◀── signal ◀──┘
//! ```
//!
//! In reference-counted mode every matched route runs inside
//! [`request_gate`]; in persistent mode the store is already open and the
//! gate is not installed.

pub mod context;
pub mod error;
pub mod routes;

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{HeaderValue, Request};
use axum::{middleware, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::Config;
use crate::core::paths::StorePaths;
use crate::gate::{request_gate, AccessSettings, GateArbiter, ModeError, StoreAccess, StoreMode};
use crate::store::{Database, DiskStoreOpener};

pub use context::{ServiceContext, SharedContext};
pub use error::{ApiError, ApiErrorBody, ApiResult};

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The store root could not be prepared.
    #[error("failed to prepare store root '{path}': {source}")]
    Setup {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Store access could not start.
    #[error(transparent)]
    Access(#[from] ModeError),

    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The server loop failed.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Request ids are random UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Build the full router.
///
/// Pass the arbiter to gate every matched route; pass `None` when the
/// store is held open for the process lifetime.
pub fn build_router(ctx: SharedContext, gate: Option<GateArbiter>) -> Router {
    let mut api = routes::api_routes();
    if let Some(arbiter) = gate {
        api = api.route_layer(middleware::from_fn_with_state(arbiter, request_gate));
    }

    api.with_state(ctx)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
}

/// Create the directories every handler expects under the root.
pub fn prepare_root(paths: &StorePaths) -> Result<(), ServerError> {
    for dir in [
        paths.db_dir(),
        paths.upload_root(),
        paths.pool_dir(),
        paths.public_root(),
    ] {
        fs::create_dir_all(&dir).map_err(|source| ServerError::Setup { path: dir, source })?;
    }
    Ok(())
}

/// The repogate HTTP service.
#[derive(Debug)]
pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Serve until SIGINT or SIGTERM, then drain the store to closed.
    pub async fn run(self) -> Result<(), ServerError> {
        let paths = StorePaths::new(self.config.root_dir());
        prepare_root(&paths)?;

        let db = Arc::new(Database::new());
        let opener = Arc::new(DiskStoreOpener::new(
            paths.clone(),
            Arc::clone(&db),
            self.config.open_timeout(),
        ));
        let mode = StoreMode::resolve(self.config.no_lock());
        let access = StoreAccess::start(
            mode,
            opener,
            AccessSettings {
                acquire_timeout: self.config.acquire_timeout(),
                flush_interval: self.config.flush_interval(),
            },
        )
        .await?;

        let ctx = Arc::new(ServiceContext::new(paths.clone(), db, mode));
        let router = build_router(ctx, access.arbiter().cloned());

        let addr = self.config.listen();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                access.shutdown().await;
                return Err(ServerError::Bind { addr, source });
            }
        };

        info!(
            %addr,
            mode = %mode,
            root = %paths.root().display(),
            "repogate listening"
        );
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        access.shutdown().await;
        served.map_err(ServerError::Serve)
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "signal handlers unavailable; falling back to ctrl-c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("received ctrl-c");
}
