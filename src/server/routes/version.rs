//! `GET /api/version`

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::server::context::SharedContext;

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
}

pub fn routes() -> Router<SharedContext> {
    Router::new().route("/api/version", get(version))
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}
