//! Snapshot routes.
//!
//! ## Routes
//!
//! - `POST   /api/repos/:name/snapshots` - Snapshot a local repository
//! - `POST   /api/mirrors/:name/snapshots` - Snapshot a mirror
//! - `GET    /api/snapshots` - List snapshots (`?sort=name|time`)
//! - `POST   /api/snapshots` - Create from other snapshots and package keys
//! - `GET    /api/snapshots/:name` - Show a snapshot
//! - `PUT    /api/snapshots/:name` - Rename or re-describe
//! - `DELETE /api/snapshots/:name` - Drop (`?force=1` ignores derived snapshots)
//! - `GET    /api/snapshots/:name/packages` - List package keys (`?q=` filter)
//! - `GET    /api/snapshots/:name/diff/:with` - Compare two snapshots

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{flag, resource_name, FilterQuery, ForceQuery};
use crate::core::types::{PackageKey, ResourceName, UtcTimestamp};
use crate::server::context::SharedContext;
use crate::server::error::{ApiError, ApiResult};
use crate::store::schema::{Index, Snapshot, SourceKind};
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct SnapshotView {
    pub name: String,
    pub description: String,
    pub source_kind: SourceKind,
    pub sources: Vec<String>,
    pub package_count: usize,
    pub created_at: String,
}

impl From<&Snapshot> for SnapshotView {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            name: snapshot.name.to_string(),
            description: snapshot.description.clone(),
            source_kind: snapshot.source_kind,
            sources: snapshot.sources.iter().map(ToString::to_string).collect(),
            package_count: snapshot.packages.len(),
            created_at: snapshot.created_at.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSnapshotRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct MergeSnapshotRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source_snapshots: Vec<String>,
    #[serde(default)]
    pub package_refs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSnapshotRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SortQuery {
    #[serde(default)]
    pub sort: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiffQuery {
    #[serde(rename = "onlyMatching", default, deserialize_with = "flag")]
    pub only_matching: bool,
}

/// One line of a snapshot comparison. A missing side means the package
/// is absent there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub left: Option<PackageKey>,
    pub right: Option<PackageKey>,
}

pub fn routes() -> Router<SharedContext> {
    Router::new()
        .route("/api/repos/:name/snapshots", post(snapshot_repo))
        .route("/api/mirrors/:name/snapshots", post(snapshot_mirror))
        .route("/api/snapshots", get(list_snapshots).post(merge_snapshots))
        .route(
            "/api/snapshots/:name",
            get(show_snapshot)
                .put(update_snapshot)
                .delete(drop_snapshot),
        )
        .route("/api/snapshots/:name/packages", get(snapshot_packages))
        .route("/api/snapshots/:name/diff/:with", get(diff_snapshots))
}

async fn snapshot_repo(
    State(ctx): State<SharedContext>,
    Path(source): Path<String>,
    Json(req): Json<CreateSnapshotRequest>,
) -> ApiResult<(StatusCode, Json<SnapshotView>)> {
    snapshot_from(&ctx, SourceKind::Local, source, req)
}

async fn snapshot_mirror(
    State(ctx): State<SharedContext>,
    Path(source): Path<String>,
    Json(req): Json<CreateSnapshotRequest>,
) -> ApiResult<(StatusCode, Json<SnapshotView>)> {
    snapshot_from(&ctx, SourceKind::Mirror, source, req)
}

fn snapshot_from(
    ctx: &SharedContext,
    kind: SourceKind,
    source: String,
    req: CreateSnapshotRequest,
) -> ApiResult<(StatusCode, Json<SnapshotView>)> {
    let source = resource_name(source)?;
    let name = resource_name(req.name)?;

    let view = ctx.db().write(|index| {
        let packages = match kind {
            SourceKind::Local => index
                .repos
                .get(&source)
                .map(|r| r.packages.clone())
                .ok_or_else(|| StoreError::not_found("local repo", &source))?,
            SourceKind::Mirror => index
                .mirrors
                .get(&source)
                .map(|m| m.packages.clone())
                .ok_or_else(|| StoreError::not_found("mirror", &source))?,
            SourceKind::Snapshot => {
                return Err(StoreError::Invalid(
                    "use POST /api/snapshots to snapshot snapshots".into(),
                ))
            }
        };
        insert_snapshot(
            index,
            Snapshot {
                name: name.clone(),
                description: req.description,
                source_kind: kind,
                sources: vec![source.clone()],
                packages,
                created_at: UtcTimestamp::now(),
            },
        )
    })?;

    info!(snapshot = %name, source = %source, kind = %kind, "snapshot created");
    Ok((StatusCode::CREATED, Json(view)))
}

fn insert_snapshot(index: &mut Index, snapshot: Snapshot) -> Result<SnapshotView, StoreError> {
    if index.snapshots.contains_key(&snapshot.name) {
        return Err(StoreError::already_exists("snapshot", &snapshot.name));
    }
    let view = SnapshotView::from(&snapshot);
    index.snapshots.insert(snapshot.name.clone(), snapshot);
    Ok(view)
}

async fn list_snapshots(
    State(ctx): State<SharedContext>,
    Query(query): Query<SortQuery>,
) -> ApiResult<Json<Vec<SnapshotView>>> {
    let by_time = match query.sort.as_deref() {
        None | Some("name") => false,
        Some("time") => true,
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "unknown sort '{other}': expected 'name' or 'time'"
            )))
        }
    };

    let views = ctx.db().read(|index| {
        let mut snapshots: Vec<&Snapshot> = index.snapshots.values().collect();
        if by_time {
            snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        }
        snapshots
            .iter()
            .map(|s| SnapshotView::from(*s))
            .collect::<Vec<_>>()
    })?;
    Ok(Json(views))
}

async fn merge_snapshots(
    State(ctx): State<SharedContext>,
    Json(req): Json<MergeSnapshotRequest>,
) -> ApiResult<(StatusCode, Json<SnapshotView>)> {
    let name = resource_name(req.name)?;
    let sources = req
        .source_snapshots
        .into_iter()
        .map(resource_name)
        .collect::<ApiResult<Vec<_>>>()?;
    let refs = req
        .package_refs
        .iter()
        .map(|k| PackageKey::parse(k))
        .collect::<Result<Vec<_>, _>>()?;

    let view = ctx.db().write(|index| {
        let mut packages = BTreeSet::new();
        for source in &sources {
            let snapshot = index
                .snapshots
                .get(source)
                .ok_or_else(|| StoreError::not_found("snapshot", source))?;
            packages.extend(snapshot.packages.iter().cloned());
        }
        for key in refs {
            if !index.packages.contains_key(&key) {
                return Err(StoreError::not_found("package", &key));
            }
            packages.insert(key);
        }
        insert_snapshot(
            index,
            Snapshot {
                name: name.clone(),
                description: req.description,
                source_kind: SourceKind::Snapshot,
                sources,
                packages,
                created_at: UtcTimestamp::now(),
            },
        )
    })?;

    info!(snapshot = %name, "snapshot created from snapshots");
    Ok((StatusCode::CREATED, Json(view)))
}

async fn show_snapshot(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<SnapshotView>> {
    let name = resource_name(name)?;
    let view = ctx
        .db()
        .read(|index| index.snapshots.get(&name).map(SnapshotView::from))?;
    view.map(Json)
        .ok_or_else(|| StoreError::not_found("snapshot", &name).into())
}

async fn update_snapshot(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
    Json(req): Json<UpdateSnapshotRequest>,
) -> ApiResult<Json<SnapshotView>> {
    let name = resource_name(name)?;
    let new_name = req.name.map(resource_name).transpose()?;

    let view = ctx.db().write(|index| {
        let mut snapshot = index
            .snapshots
            .remove(&name)
            .ok_or_else(|| StoreError::not_found("snapshot", &name))?;
        if let Some(description) = req.description {
            snapshot.description = description;
        }
        if let Some(new_name) = new_name.filter(|n| n != &name) {
            if index.snapshots.contains_key(&new_name) {
                return Err(StoreError::already_exists("snapshot", &new_name));
            }
            rename_references(index, &name, &new_name);
            snapshot.name = new_name;
        }
        let view = SnapshotView::from(&snapshot);
        index.snapshots.insert(snapshot.name.clone(), snapshot);
        Ok(view)
    })?;
    Ok(Json(view))
}

/// Point publications and derived snapshots at a renamed snapshot.
fn rename_references(index: &mut Index, old: &ResourceName, new: &ResourceName) {
    for publication in index.published.values_mut() {
        if publication.source_kind == SourceKind::Snapshot {
            for source in publication.sources.iter_mut().filter(|s| &s.name == old) {
                source.name = new.clone();
            }
        }
    }
    for snapshot in index.snapshots.values_mut() {
        if snapshot.source_kind == SourceKind::Snapshot {
            for source in snapshot.sources.iter_mut().filter(|s| *s == old) {
                *source = new.clone();
            }
        }
    }
}

async fn drop_snapshot(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
    Query(query): Query<ForceQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = resource_name(name)?;
    ctx.db().write(|index| {
        if !index.snapshots.contains_key(&name) {
            return Err(StoreError::not_found("snapshot", &name));
        }
        if let Some(publication) = index.publications_using(SourceKind::Snapshot, &name).next() {
            return Err(StoreError::InUse(format!(
                "unable to drop: snapshot '{name}' is published at '{}'",
                publication.key()
            )));
        }
        if !query.force {
            if let Some(derived) = index.snapshots_derived_from(&name).next() {
                return Err(StoreError::InUse(format!(
                    "snapshot '{name}' is a source of snapshot '{}'; use force to override",
                    derived.name
                )));
            }
        }
        index.snapshots.remove(&name);
        Ok(())
    })?;

    info!(snapshot = %name, force = query.force, "snapshot dropped");
    Ok(Json(serde_json::json!({})))
}

async fn snapshot_packages(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
    Query(filter): Query<FilterQuery>,
) -> ApiResult<Json<Vec<PackageKey>>> {
    let name = resource_name(name)?;
    let keys = ctx.db().read(|index| {
        index.snapshots.get(&name).map(|snapshot| {
            snapshot
                .packages
                .iter()
                .filter(|k| filter.q.as_deref().map_or(true, |q| k.as_str().contains(q)))
                .cloned()
                .collect::<Vec<_>>()
        })
    })?;
    keys.map(Json)
        .ok_or_else(|| StoreError::not_found("snapshot", &name).into())
}

async fn diff_snapshots(
    State(ctx): State<SharedContext>,
    Path((name, with)): Path<(String, String)>,
    Query(query): Query<DiffQuery>,
) -> ApiResult<Json<Vec<DiffEntry>>> {
    let name = resource_name(name)?;
    let with = resource_name(with)?;

    let (left, right) = ctx.db().read(|index| {
        let left = index
            .snapshots
            .get(&name)
            .map(|s| s.packages.clone())
            .ok_or_else(|| StoreError::not_found("snapshot", &name))?;
        let right = index
            .snapshots
            .get(&with)
            .map(|s| s.packages.clone())
            .ok_or_else(|| StoreError::not_found("snapshot", &with))?;
        Ok::<_, StoreError>((left, right))
    })??;

    let mut entries = diff(&left, &right);
    if query.only_matching {
        entries.retain(|e| e.left.is_some() && e.right.is_some());
    }
    Ok(Json(entries))
}

/// Compare two package sets by architecture and name.
///
/// Keys present on only one side are paired up per (arch, name) in key
/// order; leftovers come out with the other side empty.
pub fn diff(left: &BTreeSet<PackageKey>, right: &BTreeSet<PackageKey>) -> Vec<DiffEntry> {
    let mut groups: BTreeMap<(&str, &str), (Vec<&PackageKey>, Vec<&PackageKey>)> = BTreeMap::new();
    for key in left.difference(right) {
        groups.entry((key.arch(), key.name())).or_default().0.push(key);
    }
    for key in right.difference(left) {
        groups.entry((key.arch(), key.name())).or_default().1.push(key);
    }

    let mut entries = Vec::new();
    for (lefts, rights) in groups.into_values() {
        let width = lefts.len().max(rights.len());
        for i in 0..width {
            entries.push(DiffEntry {
                left: lefts.get(i).map(|k| (*k).clone()),
                right: rights.get(i).map(|k| (*k).clone()),
            });
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(arch: &str, name: &str, version: &str) -> PackageKey {
        PackageKey::new(arch, name, version, "0011223344556677")
    }

    #[test]
    fn identical_sets_have_no_diff() {
        let set: BTreeSet<_> = [key("amd64", "hello", "1.0")].into_iter().collect();
        assert!(diff(&set, &set).is_empty());
    }

    #[test]
    fn version_change_pairs_both_sides() {
        let left: BTreeSet<_> = [key("amd64", "hello", "1.0")].into_iter().collect();
        let right: BTreeSet<_> = [key("amd64", "hello", "2.0")].into_iter().collect();
        assert_eq!(
            diff(&left, &right),
            vec![DiffEntry {
                left: Some(key("amd64", "hello", "1.0")),
                right: Some(key("amd64", "hello", "2.0")),
            }]
        );
    }

    #[test]
    fn one_sided_packages() {
        let left: BTreeSet<_> = [key("amd64", "gone", "1.0")].into_iter().collect();
        let right: BTreeSet<_> = [key("arm64", "new", "1.0")].into_iter().collect();
        let entries = diff(&left, &right);
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&DiffEntry {
            left: Some(key("amd64", "gone", "1.0")),
            right: None,
        }));
        assert!(entries.contains(&DiffEntry {
            left: None,
            right: Some(key("arm64", "new", "1.0")),
        }));
    }
}
