//! Publishing routes.
//!
//! ## Routes
//!
//! - `GET    /api/publish` - List publications
//! - `POST   /api/publish/:prefix` - Publish local repos or snapshots
//! - `PUT    /api/publish/:prefix/:distribution` - Switch snapshots or refresh
//! - `DELETE /api/publish/:prefix/:distribution` - Drop a publication

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, warn};

use super::{blocking, resource_name, ForceQuery};
use crate::core::types::{ResourceName, UtcTimestamp};
use crate::server::context::SharedContext;
use crate::server::error::{ApiError, ApiResult};
use crate::store::publish::{remove_publication, write_publication};
use crate::store::schema::{Index, Publication, PublishSource, SourceKind};
use crate::store::StoreError;

/// Component used when a source does not name one.
pub const DEFAULT_COMPONENT: &str = "main";

#[derive(Debug, Deserialize)]
pub struct PublishSourceRequest {
    #[serde(default)]
    pub component: Option<String>,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub source_kind: SourceKind,
    pub sources: Vec<PublishSourceRequest>,
    #[serde(default)]
    pub distribution: Option<String>,
    #[serde(default)]
    pub architectures: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SwitchRequest {
    #[serde(default)]
    pub snapshots: Vec<PublishSourceRequest>,
}

pub fn routes() -> Router<SharedContext> {
    Router::new()
        .route("/api/publish", get(list_publications))
        .route("/api/publish/:prefix", post(publish))
        .route(
            "/api/publish/:prefix/:distribution",
            put(switch).delete(drop_publication),
        )
}

async fn list_publications(State(ctx): State<SharedContext>) -> ApiResult<Json<Vec<Publication>>> {
    let publications: Vec<Publication> = ctx
        .db()
        .read(|index| index.published.values().cloned().collect())?;
    Ok(Json(publications))
}

fn parse_sources(sources: Vec<PublishSourceRequest>) -> ApiResult<Vec<(Option<String>, ResourceName)>> {
    sources
        .into_iter()
        .map(|s| -> ApiResult<_> { Ok((s.component, resource_name(s.name)?)) })
        .collect()
}

async fn publish(
    State(ctx): State<SharedContext>,
    Path(prefix): Path<String>,
    Json(req): Json<PublishRequest>,
) -> ApiResult<(StatusCode, Json<Publication>)> {
    let prefix = resource_name(prefix)?;
    if req.source_kind == SourceKind::Mirror {
        return Err(ApiError::bad_request(
            "mirrors cannot be published directly; snapshot them first",
        ));
    }
    if req.sources.is_empty() {
        return Err(ApiError::bad_request("at least one source is required"));
    }
    let sources = parse_sources(req.sources)?;
    let distribution = req.distribution.map(resource_name).transpose()?;
    let kind = req.source_kind;
    let architectures = req.architectures;

    let publication = blocking(move || {
        let publication = ctx.db().write(|index| {
            let sources = resolve_components(index, kind, sources)?;
            let distribution = match distribution {
                Some(d) => d,
                None => default_distribution(index, kind, &sources)?,
            };
            let key = Publication::key_for(&prefix, &distribution);
            if index.published.contains_key(&key) {
                return Err(StoreError::already_exists("publication", &key));
            }

            let publication = Publication {
                prefix,
                distribution,
                source_kind: kind,
                sources,
                architectures,
                published_at: UtcTimestamp::now(),
            };
            write_publication(ctx.paths(), index, &publication)?;
            index.published.insert(key, publication.clone());
            Ok(publication)
        })?;
        Ok(publication)
    })
    .await?;

    info!(publication = %publication.key(), kind = %publication.source_kind, "published");
    Ok((StatusCode::CREATED, Json(publication)))
}

/// Fill in components and reject duplicates.
fn resolve_components(
    index: &Index,
    kind: SourceKind,
    sources: Vec<(Option<String>, ResourceName)>,
) -> Result<Vec<PublishSource>, StoreError> {
    let mut seen = BTreeSet::new();
    let mut resolved = Vec::with_capacity(sources.len());
    for (component, name) in sources {
        let component = component
            .or_else(|| match kind {
                SourceKind::Local => index
                    .repos
                    .get(&name)
                    .and_then(|r| r.default_component.clone()),
                _ => None,
            })
            .unwrap_or_else(|| DEFAULT_COMPONENT.to_string());
        if !seen.insert(component.clone()) {
            return Err(StoreError::Invalid(format!(
                "duplicate component '{component}'"
            )));
        }
        resolved.push(PublishSource { component, name });
    }
    Ok(resolved)
}

fn default_distribution(
    index: &Index,
    kind: SourceKind,
    sources: &[PublishSource],
) -> Result<ResourceName, StoreError> {
    let from_repo = match kind {
        SourceKind::Local => sources
            .iter()
            .filter_map(|s| index.repos.get(&s.name))
            .find_map(|r| r.default_distribution.clone()),
        _ => None,
    };
    let distribution = from_repo.ok_or_else(|| {
        StoreError::Invalid("distribution is required and could not be guessed".into())
    })?;
    ResourceName::new(distribution).map_err(|e| StoreError::Invalid(e.to_string()))
}

async fn switch(
    State(ctx): State<SharedContext>,
    Path((prefix, distribution)): Path<(String, String)>,
    Json(req): Json<SwitchRequest>,
) -> ApiResult<Json<Publication>> {
    let prefix = resource_name(prefix)?;
    let distribution = resource_name(distribution)?;
    let replacements = parse_sources(req.snapshots)?;

    let publication = blocking(move || {
        let key = Publication::key_for(&prefix, &distribution);
        let publication = ctx.db().write(|index| {
            let mut publication = index
                .published
                .get(&key)
                .cloned()
                .ok_or_else(|| StoreError::not_found("publication", &key))?;

            if !replacements.is_empty() {
                if publication.source_kind != SourceKind::Snapshot {
                    return Err(StoreError::Invalid(format!(
                        "publication '{key}' is not published from snapshots"
                    )));
                }
                for (component, name) in replacements {
                    let component = component.unwrap_or_else(|| DEFAULT_COMPONENT.to_string());
                    let slot = publication
                        .sources
                        .iter_mut()
                        .find(|s| s.component == component)
                        .ok_or_else(|| {
                            StoreError::Invalid(format!(
                                "component '{component}' is not in publication '{key}'"
                            ))
                        })?;
                    slot.name = name;
                }
            }

            publication.published_at = UtcTimestamp::now();
            write_publication(ctx.paths(), index, &publication)?;
            index.published.insert(key.clone(), publication.clone());
            Ok(publication)
        })?;
        Ok(publication)
    })
    .await?;

    info!(publication = %publication.key(), "publication updated");
    Ok(Json(publication))
}

async fn drop_publication(
    State(ctx): State<SharedContext>,
    Path((prefix, distribution)): Path<(String, String)>,
    Query(query): Query<ForceQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let prefix = resource_name(prefix)?;
    let distribution = resource_name(distribution)?;

    blocking(move || {
        let key = Publication::key_for(&prefix, &distribution);
        ctx.db().write(|index| {
            let publication = index
                .published
                .get(&key)
                .ok_or_else(|| StoreError::not_found("publication", &key))?;
            if let Err(e) = remove_publication(ctx.paths(), publication) {
                if !query.force {
                    return Err(e);
                }
                warn!(publication = %key, error = %e, "leaving published files behind");
            }
            index.published.remove(&key);
            Ok(())
        })?;

        info!(publication = %key, "publication dropped");
        Ok(Json(serde_json::json!({})))
    })
    .await
}
