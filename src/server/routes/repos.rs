//! Local repository routes.
//!
//! ## Routes
//!
//! - `GET    /api/repos` - List repositories
//! - `POST   /api/repos` - Create a repository
//! - `GET    /api/repos/:name` - Show a repository
//! - `PUT    /api/repos/:name` - Edit a repository
//! - `DELETE /api/repos/:name` - Drop a repository (`?force=1` ignores snapshots)
//! - `GET    /api/repos/:name/packages` - List package keys (`?q=` filter)
//! - `POST   /api/repos/:name/packages` - Add packages by key
//! - `DELETE /api/repos/:name/packages` - Remove packages by key
//! - `POST   /api/repos/:name/file/:dir[/:file]` - Import staged files (`?noRemove=1`)

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::files::list_files;
use super::{blocking, flag, resource_name, FilterQuery, ForceQuery};
use crate::core::types::{PackageKey, UtcTimestamp};
use crate::server::context::SharedContext;
use crate::server::error::{ApiError, ApiResult};
use crate::store::pool;
use crate::store::schema::{LocalRepo, SourceKind};
use crate::store::StoreError;

/// Repository as returned by the API.
#[derive(Debug, Serialize)]
pub struct RepoView {
    pub name: String,
    pub comment: String,
    pub default_distribution: Option<String>,
    pub default_component: Option<String>,
    pub package_count: usize,
    pub created_at: String,
}

impl From<&LocalRepo> for RepoView {
    fn from(repo: &LocalRepo) -> Self {
        Self {
            name: repo.name.to_string(),
            comment: repo.comment.clone(),
            default_distribution: repo.default_distribution.clone(),
            default_component: repo.default_component.clone(),
            package_count: repo.packages.len(),
            created_at: repo.created_at.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRepoRequest {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    pub default_distribution: Option<String>,
    pub default_component: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditRepoRequest {
    pub comment: Option<String>,
    pub default_distribution: Option<String>,
    pub default_component: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PackageRefsRequest {
    pub package_refs: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportQuery {
    #[serde(rename = "noRemove", default, deserialize_with = "flag")]
    pub no_remove: bool,
}

/// Outcome of importing staged files.
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub added: Vec<PackageKey>,
    pub failed: Vec<FailedFile>,
}

#[derive(Debug, Serialize)]
pub struct FailedFile {
    pub file: String,
    pub reason: String,
}

pub fn routes() -> Router<SharedContext> {
    Router::new()
        .route("/api/repos", get(list_repos).post(create_repo))
        .route(
            "/api/repos/:name",
            get(show_repo).put(edit_repo).delete(drop_repo),
        )
        .route(
            "/api/repos/:name/packages",
            get(list_packages)
                .post(add_packages)
                .delete(remove_packages),
        )
        .route("/api/repos/:name/file/:dir", post(import_dir))
        .route("/api/repos/:name/file/:dir/:file", post(import_one))
}

async fn list_repos(State(ctx): State<SharedContext>) -> ApiResult<Json<Vec<RepoView>>> {
    let repos: Vec<RepoView> = ctx
        .db()
        .read(|index| index.repos.values().map(RepoView::from).collect())?;
    Ok(Json(repos))
}

async fn create_repo(
    State(ctx): State<SharedContext>,
    Json(req): Json<CreateRepoRequest>,
) -> ApiResult<(StatusCode, Json<RepoView>)> {
    let name = resource_name(req.name)?;
    let repo = LocalRepo {
        name: name.clone(),
        comment: req.comment,
        default_distribution: req.default_distribution,
        default_component: req.default_component,
        packages: Default::default(),
        created_at: UtcTimestamp::now(),
    };

    let view = ctx.db().write(|index| {
        if index.repos.contains_key(&name) {
            return Err(StoreError::already_exists("local repo", &name));
        }
        let view = RepoView::from(&repo);
        index.repos.insert(name.clone(), repo);
        Ok(view)
    })?;

    info!(repo = %name, "local repo created");
    Ok((StatusCode::CREATED, Json(view)))
}

async fn show_repo(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<RepoView>> {
    let name = resource_name(name)?;
    let view = ctx.db().read(|index| index.repos.get(&name).map(RepoView::from))?;
    view.map(Json)
        .ok_or_else(|| StoreError::not_found("local repo", &name).into())
}

async fn edit_repo(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
    Json(req): Json<EditRepoRequest>,
) -> ApiResult<Json<RepoView>> {
    let name = resource_name(name)?;
    let view = ctx.db().write(|index| {
        let repo = index
            .repos
            .get_mut(&name)
            .ok_or_else(|| StoreError::not_found("local repo", &name))?;
        if let Some(comment) = req.comment {
            repo.comment = comment;
        }
        if let Some(distribution) = req.default_distribution {
            repo.default_distribution = Some(distribution);
        }
        if let Some(component) = req.default_component {
            repo.default_component = Some(component);
        }
        Ok(RepoView::from(&*repo))
    })?;
    Ok(Json(view))
}

async fn drop_repo(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
    Query(query): Query<ForceQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = resource_name(name)?;
    ctx.db().write(|index| {
        if !index.repos.contains_key(&name) {
            return Err(StoreError::not_found("local repo", &name));
        }
        if let Some(publication) = index.publications_using(SourceKind::Local, &name).next() {
            return Err(StoreError::InUse(format!(
                "unable to drop: local repo '{name}' is published at '{}'",
                publication.key()
            )));
        }
        let has_snapshots = index
            .snapshots
            .values()
            .any(|s| s.source_kind == SourceKind::Local && s.sources.contains(&name));
        if has_snapshots && !query.force {
            return Err(StoreError::InUse(format!(
                "local repo '{name}' has snapshots; use force to override"
            )));
        }
        index.repos.remove(&name);
        Ok(())
    })?;

    info!(repo = %name, force = query.force, "local repo dropped");
    Ok(Json(serde_json::json!({})))
}

async fn list_packages(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
    Query(filter): Query<FilterQuery>,
) -> ApiResult<Json<Vec<PackageKey>>> {
    let name = resource_name(name)?;
    let keys = ctx.db().read(|index| {
        index.repos.get(&name).map(|repo| {
            repo.packages
                .iter()
                .filter(|k| filter.q.as_deref().map_or(true, |q| k.as_str().contains(q)))
                .cloned()
                .collect::<Vec<_>>()
        })
    })?;
    keys.map(Json)
        .ok_or_else(|| StoreError::not_found("local repo", &name).into())
}

async fn add_packages(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
    Json(req): Json<PackageRefsRequest>,
) -> ApiResult<Json<RepoView>> {
    change_membership(&ctx, name, req, true)
}

async fn remove_packages(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
    Json(req): Json<PackageRefsRequest>,
) -> ApiResult<Json<RepoView>> {
    change_membership(&ctx, name, req, false)
}

fn change_membership(
    ctx: &SharedContext,
    name: String,
    req: PackageRefsRequest,
    add: bool,
) -> ApiResult<Json<RepoView>> {
    let name = resource_name(name)?;
    let keys = req
        .package_refs
        .iter()
        .map(|k| PackageKey::parse(k))
        .collect::<Result<Vec<_>, _>>()?;

    let view = ctx.db().write(|index| {
        if let Some(missing) = keys.iter().find(|k| !index.packages.contains_key(*k)) {
            return Err(StoreError::not_found("package", missing));
        }
        let repo = index
            .repos
            .get_mut(&name)
            .ok_or_else(|| StoreError::not_found("local repo", &name))?;
        for key in keys {
            if add {
                repo.packages.insert(key);
            } else {
                repo.packages.remove(&key);
            }
        }
        Ok(RepoView::from(&*repo))
    })?;
    Ok(Json(view))
}

async fn import_dir(
    State(ctx): State<SharedContext>,
    Path((name, dir)): Path<(String, String)>,
    Query(query): Query<ImportQuery>,
) -> ApiResult<Json<ImportReport>> {
    import(ctx, name, dir, None, query.no_remove).await
}

async fn import_one(
    State(ctx): State<SharedContext>,
    Path((name, dir, file)): Path<(String, String, String)>,
    Query(query): Query<ImportQuery>,
) -> ApiResult<Json<ImportReport>> {
    import(ctx, name, dir, Some(file), query.no_remove).await
}

async fn import(
    ctx: SharedContext,
    name: String,
    dir: String,
    file: Option<String>,
    no_remove: bool,
) -> ApiResult<Json<ImportReport>> {
    let name = resource_name(name)?;
    let dir = resource_name(dir)?;
    let file = file.map(resource_name).transpose()?;

    // Check the repo before touching any staged file.
    if !ctx.db().read(|index| index.repos.contains_key(&name))? {
        return Err(StoreError::not_found("local repo", &name).into());
    }

    blocking(move || {
        let upload = ctx.paths().upload_dir(&dir);
        if !upload.is_dir() {
            return Err(ApiError::not_found(format!(
                "upload directory '{dir}' not found"
            )));
        }
        let sources = match &file {
            Some(file) => vec![upload.join(file.as_str())],
            None => list_files(&upload)?
                .into_iter()
                .map(|f| upload.join(f))
                .collect(),
        };

        let mut report = ImportReport::default();
        let mut imported = Vec::new();
        for source in sources {
            let display = source
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            match pool::import_file(ctx.paths(), &source, no_remove) {
                Ok(package) => imported.push(package),
                Err(e) => report.failed.push(FailedFile {
                    file: display,
                    reason: e.to_string(),
                }),
            }
        }
        report.added = imported.iter().map(|p| p.key.clone()).collect();

        ctx.db().write(|index| {
            let repo = index
                .repos
                .get_mut(&name)
                .ok_or_else(|| StoreError::not_found("local repo", &name))?;
            repo.packages.extend(imported.iter().map(|p| p.key.clone()));
            for package in imported {
                index.packages.entry(package.key.clone()).or_insert(package);
            }
            Ok(())
        })?;

        if !no_remove {
            // Only succeeds once every staged file has been consumed.
            let _ = std::fs::remove_dir(&upload);
        }

        info!(
            repo = %name,
            added = report.added.len(),
            failed = report.failed.len(),
            "staged files imported"
        );
        Ok(Json(report))
    })
    .await
}
