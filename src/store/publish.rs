//! store::publish
//!
//! Writing and removing published package indexes.
//!
//! A publication renders one `Packages` file at
//! `public/<prefix>/dists/<distribution>/Packages` listing every package
//! reachable from its sources, filtered by architecture when the
//! publication names any.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;

use tracing::info;

use super::schema::{Index, Package, Publication, SourceKind};
use super::StoreError;
use crate::core::paths::StorePaths;
use crate::core::types::PackageKey;

/// Packages a publication exposes, keyed for stable output.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if a source no longer exists.
pub fn collect_packages<'a>(
    index: &'a Index,
    publication: &Publication,
) -> Result<BTreeMap<&'a PackageKey, &'a Package>, StoreError> {
    let mut out = BTreeMap::new();
    for source in &publication.sources {
        let keys = match publication.source_kind {
            SourceKind::Local => index
                .repos
                .get(&source.name)
                .map(|r| &r.packages)
                .ok_or_else(|| StoreError::not_found("local repo", &source.name))?,
            SourceKind::Snapshot => index
                .snapshots
                .get(&source.name)
                .map(|s| &s.packages)
                .ok_or_else(|| StoreError::not_found("snapshot", &source.name))?,
            SourceKind::Mirror => index
                .mirrors
                .get(&source.name)
                .map(|m| &m.packages)
                .ok_or_else(|| StoreError::not_found("mirror", &source.name))?,
        };
        for package in index.resolve(keys) {
            let wanted = publication.architectures.is_empty()
                || publication
                    .architectures
                    .iter()
                    .any(|a| a == &package.architecture || package.architecture == "all");
            if wanted {
                out.insert(&package.key, package);
            }
        }
    }
    Ok(out)
}

/// Render a Debian-style `Packages` index.
pub fn render_packages<'a>(
    paths: &StorePaths,
    packages: impl IntoIterator<Item = &'a Package>,
) -> String {
    let mut out = String::new();
    for package in packages {
        let pooled = paths.pool_file(&package.sha256, &package.filename);
        let relative = pooled
            .strip_prefix(paths.root())
            .unwrap_or(&pooled)
            .display()
            .to_string();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "Package: {}", package.name);
        let _ = writeln!(out, "Version: {}", package.version);
        let _ = writeln!(out, "Architecture: {}", package.architecture);
        let _ = writeln!(out, "Filename: {relative}");
        let _ = writeln!(out, "Size: {}", package.size);
        let _ = writeln!(out, "SHA256: {}", package.sha256);
        out.push('\n');
    }
    out
}

/// Write the publication's `Packages` file, replacing any previous one.
pub fn write_publication(
    paths: &StorePaths,
    index: &Index,
    publication: &Publication,
) -> Result<PathBuf, StoreError> {
    let packages = collect_packages(index, publication)?;
    let rendered = render_packages(paths, packages.values().copied());

    let dir = paths.publish_dist_dir(&publication.prefix, &publication.distribution);
    fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

    let path = dir.join("Packages");
    let temp_path = dir.join("Packages.tmp");
    let mut file = fs::File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;
    file.write_all(rendered.as_bytes())
        .map_err(|e| StoreError::io(&temp_path, e))?;
    file.sync_all().map_err(|e| StoreError::io(&temp_path, e))?;
    fs::rename(&temp_path, &path).map_err(|e| StoreError::io(&path, e))?;

    info!(
        publication = %publication.key(),
        packages = packages.len(),
        "publication written"
    );
    Ok(path)
}

/// Remove a publication's files, and its prefix directory once empty.
pub fn remove_publication(paths: &StorePaths, publication: &Publication) -> Result<(), StoreError> {
    let dir = paths.publish_dist_dir(&publication.prefix, &publication.distribution);
    match fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(StoreError::io(&dir, e)),
    }

    let dists = paths.publish_prefix_dir(&publication.prefix).join("dists");
    let prefix = paths.publish_prefix_dir(&publication.prefix);
    for empty in [dists, prefix] {
        // Non-empty means another distribution still lives here.
        let _ = fs::remove_dir(&empty);
    }
    info!(publication = %publication.key(), "publication removed");
    Ok(())
}
