//! `GET /api/packages/:key`

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::core::types::PackageKey;
use crate::server::context::SharedContext;
use crate::server::error::ApiResult;
use crate::store::schema::Package;
use crate::store::StoreError;

pub fn routes() -> Router<SharedContext> {
    Router::new().route("/api/packages/:key", get(show_package))
}

async fn show_package(
    State(ctx): State<SharedContext>,
    Path(key): Path<String>,
) -> ApiResult<Json<Package>> {
    let key = PackageKey::parse(&key)?;
    let package = ctx.db().read(|index| index.packages.get(&key).cloned())?;
    package
        .map(Json)
        .ok_or_else(|| StoreError::not_found("package", &key).into())
}
