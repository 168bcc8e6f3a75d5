//! `GET /api/graph.:ext`
//!
//! Renders the relationships between repos, mirrors, snapshots and
//! publications as Graphviz DOT. Only the `dot` and `gv` extensions are
//! served; rendering to images needs an external Graphviz install.

use std::fmt::Write as _;

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::server::context::SharedContext;
use crate::server::error::{ApiError, ApiResult};
use crate::store::schema::{Index, SourceKind};

pub const DOT_CONTENT_TYPE: &str = "text/vnd.graphviz";

#[derive(Debug, Default, Deserialize)]
pub struct GraphQuery {
    #[serde(default)]
    pub layout: Option<String>,
}

pub fn routes() -> Router<SharedContext> {
    // `graph.dot` cannot be split at the dot by the router, so the whole
    // segment is captured and parsed here. Static `/api/*` routes win.
    Router::new().route("/api/:file", get(graph))
}

async fn graph(
    State(ctx): State<SharedContext>,
    Path(file): Path<String>,
    Query(query): Query<GraphQuery>,
) -> ApiResult<Response> {
    let Some(ext) = file.strip_prefix("graph.") else {
        return Err(ApiError::not_found(format!("no route for /api/{file}")));
    };
    if ext != "dot" && ext != "gv" {
        return Err(ApiError::bad_request(format!(
            "unsupported graph format '{ext}': only 'dot' and 'gv' are served"
        )));
    }
    let horizontal = match query.layout.as_deref() {
        None | Some("vertical") => false,
        Some("horizontal") => true,
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "unknown layout '{other}': expected 'horizontal' or 'vertical'"
            )))
        }
    };

    let dot = ctx.db().read(|index| render_dot(index, horizontal))?;
    Ok(([(CONTENT_TYPE, DOT_CONTENT_TYPE)], dot).into_response())
}

fn quote(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

/// Render the index as a DOT digraph.
pub fn render_dot(index: &Index, horizontal: bool) -> String {
    let mut out = String::from("digraph repogate {\n");
    if horizontal {
        out.push_str("  rankdir=LR;\n");
    }
    out.push_str("  node [shape=box, fontname=\"Helvetica\"];\n");

    // Writing to a String cannot fail.
    for repo in index.repos.values() {
        let _ = writeln!(
            out,
            "  {} [label={}, style=filled, fillcolor=\"#c3e6cb\"];",
            quote(&format!("repo:{}", repo.name)),
            quote(&format!("{}\nlocal repo\n{} packages", repo.name, repo.packages.len())),
        );
    }
    for mirror in index.mirrors.values() {
        let _ = writeln!(
            out,
            "  {} [label={}, style=filled, fillcolor=\"#bee5eb\"];",
            quote(&format!("mirror:{}", mirror.name)),
            quote(&format!(
                "{}\nmirror of {}\n{} packages",
                mirror.name,
                mirror.archive_url,
                mirror.packages.len()
            )),
        );
    }
    for snapshot in index.snapshots.values() {
        let id = quote(&format!("snapshot:{}", snapshot.name));
        let _ = writeln!(
            out,
            "  {id} [label={}, style=filled, fillcolor=\"#ffeeba\"];",
            quote(&format!(
                "{}\nsnapshot\n{} packages",
                snapshot.name,
                snapshot.packages.len()
            )),
        );
        for source in &snapshot.sources {
            let from = node_id(snapshot.source_kind, source.as_str());
            let _ = writeln!(out, "  {} -> {id};", quote(&from));
        }
    }
    for publication in index.published.values() {
        let id = quote(&format!("publish:{}", publication.key()));
        let _ = writeln!(
            out,
            "  {id} [label={}, style=filled, fillcolor=\"#f5c6cb\"];",
            quote(&format!("{}\npublished", publication.key())),
        );
        for source in &publication.sources {
            let _ = writeln!(
                out,
                "  {} -> {id} [label={}];",
                quote(&node_id(publication.source_kind, source.name.as_str())),
                quote(&source.component),
            );
        }
    }

    out.push_str("}\n");
    out
}

fn node_id(kind: SourceKind, name: &str) -> String {
    match kind {
        SourceKind::Local => format!("repo:{name}"),
        SourceKind::Mirror => format!("mirror:{name}"),
        SourceKind::Snapshot => format!("snapshot:{name}"),
    }
}
