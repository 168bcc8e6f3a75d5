//! core::paths
//!
//! Centralized path routing for repogate storage locations.
//!
//! # Storage Layout
//!
//! Everything lives under the configured root directory:
//! - `db/LOCK` - Exclusive lock file guarding the index
//! - `db/index.json` - The metadata index
//! - `upload/<dir>/` - Staged files waiting to be imported
//! - `pool/` - Imported package files
//! - `public/<prefix>/dists/<distribution>/` - Published indexes
//!
//! **Hard rule:** no code outside this module joins store subdirectories
//! by hand. Callers pass validated [`ResourceName`]s so a component can
//! never escape the root.
//!
//! # Example
//!
//! ```
//! use repogate::core::paths::StorePaths;
//! use std::path::PathBuf;
//!
//! let paths = StorePaths::new(PathBuf::from("/srv/repogate"));
//! assert_eq!(paths.lock_path(), PathBuf::from("/srv/repogate/db/LOCK"));
//! ```

use std::path::{Path, PathBuf};

use crate::core::types::ResourceName;

/// Centralized path routing for the store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    /// Root directory of the store.
    pub root: PathBuf,
}

impl StorePaths {
    /// Create paths rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // =========================================================================
    // Database
    // =========================================================================

    /// Directory holding the lock file and the index.
    ///
    /// Returns `<root>/db`
    pub fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    /// Path to the exclusive lock file.
    ///
    /// Returns `<root>/db/LOCK`
    pub fn lock_path(&self) -> PathBuf {
        self.db_dir().join("LOCK")
    }

    /// Path to the index file.
    ///
    /// Returns `<root>/db/index.json`
    pub fn index_path(&self) -> PathBuf {
        self.db_dir().join("index.json")
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Root of all staged uploads.
    ///
    /// Returns `<root>/upload`
    pub fn upload_root(&self) -> PathBuf {
        self.root.join("upload")
    }

    /// A single upload directory.
    ///
    /// Returns `<root>/upload/<dir>`
    pub fn upload_dir(&self, dir: &ResourceName) -> PathBuf {
        self.upload_root().join(dir.as_str())
    }

    /// Package pool.
    ///
    /// Returns `<root>/pool`
    pub fn pool_dir(&self) -> PathBuf {
        self.root.join("pool")
    }

    /// Pool location for a package file, fanned out by the first two hash characters.
    ///
    /// Returns `<root>/pool/<hh>/<filename>`
    pub fn pool_file(&self, sha256: &str, filename: &str) -> PathBuf {
        let fan = sha256.get(..2).unwrap_or("00");
        self.pool_dir().join(fan).join(filename)
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Root of published trees.
    ///
    /// Returns `<root>/public`
    pub fn public_root(&self) -> PathBuf {
        self.root.join("public")
    }

    /// Directory of a published prefix.
    ///
    /// Returns `<root>/public/<prefix>`
    pub fn publish_prefix_dir(&self, prefix: &ResourceName) -> PathBuf {
        self.public_root().join(prefix.as_str())
    }

    /// Directory of one published distribution.
    ///
    /// Returns `<root>/public/<prefix>/dists/<distribution>`
    pub fn publish_dist_dir(&self, prefix: &ResourceName, distribution: &ResourceName) -> PathBuf {
        self.publish_prefix_dir(prefix)
            .join("dists")
            .join(distribution.as_str())
    }
}
