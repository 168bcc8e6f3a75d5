//! store::pool
//!
//! Package files: recognizing staged uploads and placing them in the pool.
//!
//! Staged files are named `<name>_<version>_<arch>.deb`. Importing one
//! hashes it, derives its [`PackageKey`], and moves (or copies) it to
//! `pool/<hh>/<filename>`.

use std::fs;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::schema::Package;
use super::StoreError;
use crate::core::paths::StorePaths;
use crate::core::types::PackageKey;

/// Length of the hash prefix carried in package keys.
pub const KEY_HASH_LEN: usize = 16;

/// Fields recovered from a staged file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebFileName {
    pub name: String,
    pub version: String,
    pub arch: String,
}

/// Parse `<name>_<version>_<arch>.deb`.
///
/// Returns `None` for anything else, including names with extra `_`.
pub fn parse_deb_filename(filename: &str) -> Option<DebFileName> {
    let stem = filename.strip_suffix(".deb")?;
    let mut parts = stem.split('_');
    let (name, version, arch) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || [name, version, arch].iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(DebFileName {
        name: name.to_string(),
        version: version.to_string(),
        arch: arch.to_string(),
    })
}

/// SHA-256 and size of a file.
pub fn hash_file(path: &Path) -> Result<(String, u64), StoreError> {
    let mut file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher).map_err(|e| StoreError::io(path, e))?;
    Ok((hex::encode(hasher.finalize()), size))
}

/// Import one staged file into the pool.
///
/// With `keep_source` the staged file is copied and left in place;
/// otherwise it is moved.
///
/// # Errors
///
/// - [`StoreError::Invalid`] if the file name is not a recognizable `.deb`
/// - [`StoreError::InUse`] if the pool already holds a different file
///   under the same name
/// - [`StoreError::Io`] on filesystem failure
pub fn import_file(
    paths: &StorePaths,
    source: &Path,
    keep_source: bool,
) -> Result<Package, StoreError> {
    let filename = source
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| StoreError::Invalid(format!("unusable file name: {}", source.display())))?;
    let parsed = parse_deb_filename(filename).ok_or_else(|| {
        StoreError::Invalid(format!(
            "unable to parse '{filename}': expected <name>_<version>_<arch>.deb"
        ))
    })?;

    let (sha256, size) = hash_file(source)?;
    let dest = paths.pool_file(&sha256, filename);

    if dest.exists() {
        let (existing, _) = hash_file(&dest)?;
        if existing != sha256 {
            return Err(StoreError::InUse(format!(
                "pool already holds a different '{filename}'"
            )));
        }
        if !keep_source {
            fs::remove_file(source).map_err(|e| StoreError::io(source, e))?;
        }
    } else {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        if keep_source {
            fs::copy(source, &dest).map_err(|e| StoreError::io(&dest, e))?;
        } else {
            move_file(source, &dest)?;
        }
    }
    debug!(file = filename, pool = %dest.display(), "package file pooled");

    Ok(Package {
        key: PackageKey::new(&parsed.arch, &parsed.name, &parsed.version, &sha256[..KEY_HASH_LEN]),
        name: parsed.name,
        version: parsed.version,
        architecture: parsed.arch,
        filename: filename.to_string(),
        sha256,
        size,
    })
}

/// Rename, falling back to copy-and-delete across filesystems.
fn move_file(source: &Path, dest: &Path) -> Result<(), StoreError> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest).map_err(|e| StoreError::io(dest, e))?;
    fs::remove_file(source).map_err(|e| StoreError::io(source, e))
}
