//! HTTP route handlers.
//!
//! Handlers are thin: they validate input, run one read or write against
//! the [`Database`](crate::store::Database), and shape the response.
//! Filesystem work (imports, publishing, uploads) runs on the blocking pool.

pub mod files;
pub mod graph;
pub mod packages;
pub mod publish;
pub mod repos;
pub mod snapshots;
pub mod version;

use axum::Router;
use serde::{Deserialize, Deserializer};

use super::context::SharedContext;
use super::error::{ApiError, ApiResult};
use crate::core::types::ResourceName;

/// All `/api` routes.
pub fn api_routes() -> Router<SharedContext> {
    Router::new()
        .merge(version::routes())
        .merge(repos::routes())
        .merge(snapshots::routes())
        .merge(files::routes())
        .merge(publish::routes())
        .merge(packages::routes())
        .merge(graph::routes())
}

/// `?force=1` on destructive operations.
#[derive(Debug, Default, Deserialize)]
pub struct ForceQuery {
    #[serde(default, deserialize_with = "flag")]
    pub force: bool,
}

/// Substring filter for package listings.
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    #[serde(default)]
    pub q: Option<String>,
}

/// Accepts `1`, `true` and `yes` as set; anything else is unset.
pub(crate) fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(matches!(raw.as_deref(), Some("1" | "true" | "yes")))
}

/// Validate a name taken from the URL.
pub(crate) fn resource_name(raw: String) -> ApiResult<ResourceName> {
    ResourceName::new(raw).map_err(ApiError::from)
}

/// Run filesystem-bound work off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::internal(format!("worker task failed: {e}")))?
}
