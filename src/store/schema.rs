//! store::schema
//!
//! Index schema: every record the store persists.
//!
//! The index is a single JSON document. External tools that share the
//! store root read and write the same file while repogate does not hold
//! the lock, so unknown fields are tolerated and ignored.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::types::{PackageKey, ResourceName, UtcTimestamp};

/// Current index format version.
pub const INDEX_VERSION: u32 = 1;

/// Where a snapshot or publication takes its packages from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A local repository.
    Local,
    /// A remote mirror.
    Mirror,
    /// One or more snapshots.
    Snapshot,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Mirror => "mirror",
            Self::Snapshot => "snapshot",
        })
    }
}

/// A package in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub key: PackageKey,
    pub name: String,
    pub version: String,
    pub architecture: String,
    /// File name inside the pool.
    pub filename: String,
    pub sha256: String,
    pub size: u64,
}

/// A local, mutable repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRepo {
    pub name: ResourceName,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub default_distribution: Option<String>,
    #[serde(default)]
    pub default_component: Option<String>,
    #[serde(default)]
    pub packages: BTreeSet<PackageKey>,
    pub created_at: UtcTimestamp,
}

/// A mirror of a remote archive.
///
/// repogate never creates or updates mirrors itself; mirror maintenance
/// is done by external tools between request bursts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub name: ResourceName,
    pub archive_url: String,
    pub distribution: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub packages: BTreeSet<PackageKey>,
}

/// An immutable set of packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: ResourceName,
    #[serde(default)]
    pub description: String,
    pub source_kind: SourceKind,
    #[serde(default)]
    pub sources: Vec<ResourceName>,
    #[serde(default)]
    pub packages: BTreeSet<PackageKey>,
    pub created_at: UtcTimestamp,
}

/// One source of a publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSource {
    pub component: String,
    pub name: ResourceName,
}

/// A published distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub prefix: ResourceName,
    pub distribution: ResourceName,
    pub source_kind: SourceKind,
    pub sources: Vec<PublishSource>,
    #[serde(default)]
    pub architectures: Vec<String>,
    pub published_at: UtcTimestamp,
}

impl Publication {
    /// Index key for a publication: `<prefix>/<distribution>`.
    pub fn key_for(prefix: &ResourceName, distribution: &ResourceName) -> String {
        format!("{}/{}", prefix, distribution)
    }

    /// This publication's index key.
    pub fn key(&self) -> String {
        Self::key_for(&self.prefix, &self.distribution)
    }

    /// Whether this publication reads from the named source.
    pub fn uses(&self, kind: SourceKind, name: &ResourceName) -> bool {
        self.source_kind == kind && self.sources.iter().any(|s| &s.name == name)
    }
}

/// The whole index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub version: u32,
    #[serde(default)]
    pub repos: BTreeMap<ResourceName, LocalRepo>,
    #[serde(default)]
    pub mirrors: BTreeMap<ResourceName, Mirror>,
    #[serde(default)]
    pub snapshots: BTreeMap<ResourceName, Snapshot>,
    #[serde(default)]
    pub published: BTreeMap<String, Publication>,
    #[serde(default)]
    pub packages: BTreeMap<PackageKey, Package>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            repos: BTreeMap::new(),
            mirrors: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            published: BTreeMap::new(),
            packages: BTreeMap::new(),
        }
    }
}

impl Index {
    /// Publications reading from the named source.
    pub fn publications_using<'a>(
        &'a self,
        kind: SourceKind,
        name: &'a ResourceName,
    ) -> impl Iterator<Item = &'a Publication> + 'a {
        self.published.values().filter(move |p| p.uses(kind, name))
    }

    /// Snapshots built from the named snapshot.
    pub fn snapshots_derived_from<'a>(
        &'a self,
        name: &'a ResourceName,
    ) -> impl Iterator<Item = &'a Snapshot> + 'a {
        self.snapshots
            .values()
            .filter(move |s| s.source_kind == SourceKind::Snapshot && s.sources.contains(name))
    }

    /// Resolve package keys to pool records, skipping keys the pool lacks.
    pub fn resolve<'a>(
        &'a self,
        keys: &'a BTreeSet<PackageKey>,
    ) -> impl Iterator<Item = &'a Package> + 'a {
        keys.iter().filter_map(move |k| self.packages.get(k))
    }
}
