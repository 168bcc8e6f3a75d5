//! Upload staging routes.
//!
//! ## Routes
//!
//! - `GET    /api/files` - List upload directories
//! - `POST   /api/files/:dir` - Upload files (multipart)
//! - `GET    /api/files/:dir` - List files in a directory
//! - `DELETE /api/files/:dir` - Delete a directory
//! - `DELETE /api/files/:dir/:name` - Delete one file
//!
//! Uploads are streamed to disk field by field, so the body size is not
//! capped. Deleting something that is already gone succeeds.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path as FsPath, PathBuf};

use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{blocking, resource_name};
use crate::server::context::SharedContext;
use crate::server::error::{ApiError, ApiResult};
use crate::store::StoreError;

pub fn routes() -> Router<SharedContext> {
    Router::new()
        .route("/api/files", get(list_dirs))
        .route(
            "/api/files/:dir",
            get(list_dir).post(upload).delete(delete_dir),
        )
        .route("/api/files/:dir/:name", delete(delete_file))
        .layer(DefaultBodyLimit::disable())
}

/// Regular files in `dir`, sorted by name.
pub(crate) fn list_files(dir: &FsPath) -> ApiResult<Vec<String>> {
    list_entries(dir, |kind| kind.is_file())
}

fn list_entries(dir: &FsPath, keep: impl Fn(fs::FileType) -> bool) -> ApiResult<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let kind = entry.file_type().map_err(|e| StoreError::io(entry.path(), e))?;
        if keep(kind) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

async fn list_dirs(State(ctx): State<SharedContext>) -> ApiResult<Json<Vec<String>>> {
    blocking(move || {
        let root = ctx.paths().upload_root();
        if !root.is_dir() {
            return Ok(Json(Vec::new()));
        }
        list_entries(&root, |kind| kind.is_dir()).map(Json)
    })
    .await
}

async fn list_dir(
    State(ctx): State<SharedContext>,
    Path(dir): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let dir = resource_name(dir)?;
    blocking(move || {
        let path = ctx.paths().upload_dir(&dir);
        if !path.is_dir() {
            return Err(ApiError::not_found(format!(
                "upload directory '{dir}' not found"
            )));
        }
        list_files(&path).map(Json)
    })
    .await
}

async fn upload(
    State(ctx): State<SharedContext>,
    Path(dir): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<Vec<String>>> {
    let dir = resource_name(dir)?;
    let path = ctx.paths().upload_dir(&dir);
    tokio::fs::create_dir_all(&path)
        .await
        .map_err(|e| StoreError::io(&path, e))?;

    let mut stored = Vec::new();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let filename = resource_name(filename)?;
        let dest = path.join(filename.as_str());
        let bytes = stream_to_file(&mut field, &dest).await?;
        debug!(dir = %dir, file = %filename, bytes, "upload stored");
        stored.push(format!("{dir}/{filename}"));
    }

    info!(dir = %dir, files = stored.len(), "files staged");
    Ok(Json(stored))
}

/// Write one multipart field to `dest` as its chunks arrive.
///
/// Chunks go to a `.part` sibling that is renamed into place once the field
/// ends. A failed or cut-off upload removes the partial file.
async fn stream_to_file(field: &mut Field<'_>, dest: &FsPath) -> ApiResult<usize> {
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    match write_chunks(field, &partial).await {
        Ok(bytes) => {
            tokio::fs::rename(&partial, dest)
                .await
                .map_err(|e| StoreError::io(dest, e))?;
            Ok(bytes)
        }
        Err(e) => {
            match tokio::fs::remove_file(&partial).await {
                Ok(()) => {}
                Err(cleanup) if cleanup.kind() == ErrorKind::NotFound => {}
                Err(cleanup) => {
                    warn!(path = %partial.display(), error = %cleanup, "partial upload not removed");
                }
            }
            Err(e)
        }
    }
}

async fn write_chunks(field: &mut Field<'_>, path: &FsPath) -> ApiResult<usize> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    let mut written = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::bad_request(format!("upload interrupted: {e}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        written += chunk.len();
    }
    file.flush().await.map_err(|e| StoreError::io(path, e))?;
    Ok(written)
}

async fn delete_dir(
    State(ctx): State<SharedContext>,
    Path(dir): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let dir = resource_name(dir)?;
    blocking(move || {
        let path = ctx.paths().upload_dir(&dir);
        match fs::remove_dir_all(&path) {
            Ok(()) => info!(dir = %dir, "upload directory removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&path, e).into()),
        }
        Ok(Json(serde_json::json!({})))
    })
    .await
}

async fn delete_file(
    State(ctx): State<SharedContext>,
    Path((dir, name)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let dir = resource_name(dir)?;
    let name = resource_name(name)?;
    blocking(move || {
        let path = ctx.paths().upload_dir(&dir).join(name.as_str());
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&path, e).into()),
        }
        Ok(Json(serde_json::json!({})))
    })
    .await
}
