//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`ResourceName`] - Validated name of a repository, snapshot, mirror or upload dir
//! - [`PackageKey`] - Unique identifier of a package in the pool
//! - [`UtcTimestamp`] - RFC3339 timestamp
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, so handlers never see a name that could escape
//! the store root when joined onto a path.
//!
//! # Examples
//!
//! ```
//! use repogate::core::types::{PackageKey, ResourceName};
//!
//! let repo = ResourceName::new("stable-main").unwrap();
//! assert_eq!(repo.as_str(), "stable-main");
//!
//! let key = PackageKey::new("amd64", "hello", "2.10-3", "0123456789abcdef");
//! assert_eq!(key.as_str(), "Pamd64 hello 2.10-3 0123456789abcdef");
//!
//! assert!(ResourceName::new("../etc").is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid package key: {0}")]
    InvalidPackageKey(String),
}

/// A validated resource name.
///
/// Names are used both as index keys and as single path components
/// (upload directories, publish prefixes), so they must:
/// - Not be empty or longer than 255 bytes
/// - Not start with `.`
/// - Not contain `/`, `\` or ASCII control characters
///
/// # Example
///
/// ```
/// use repogate::core::types::ResourceName;
///
/// assert!(ResourceName::new("wheezy_main").is_ok());
/// assert!(ResourceName::new("").is_err());
/// assert!(ResourceName::new(".hidden").is_err());
/// assert!(ResourceName::new("a/b").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName(String);

impl ResourceName {
    /// Maximum length in bytes; one path component on common filesystems.
    pub const MAX_LEN: usize = 255;

    /// Create a new validated name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidName` if the name violates the rules above.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidName("name cannot be empty".into()));
        }
        if name.len() > Self::MAX_LEN {
            return Err(TypeError::InvalidName(format!(
                "name cannot exceed {} bytes",
                Self::MAX_LEN
            )));
        }
        if name.starts_with('.') {
            return Err(TypeError::InvalidName("name cannot start with '.'".into()));
        }
        for c in ['/', '\\'] {
            if name.contains(c) {
                return Err(TypeError::InvalidName(format!("name cannot contain '{c}'")));
            }
        }
        if name.chars().any(|c| c.is_ascii_control()) {
            return Err(TypeError::InvalidName(
                "name cannot contain control characters".into(),
            ));
        }
        Ok(())
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ResourceName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.0
    }
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A package key: `P<arch> <name> <version> <hash>`.
///
/// The hash is a prefix of the SHA-256 of the package file, which keeps
/// two different builds of the same name/version/arch apart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageKey(String);

impl PackageKey {
    /// Build a key from its components.
    pub fn new(arch: &str, name: &str, version: &str, hash: &str) -> Self {
        Self(format!("P{arch} {name} {version} {hash}"))
    }

    /// Parse a key received from a client.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidPackageKey` unless the key has four
    /// space-separated fields and starts with `P`.
    pub fn parse(key: &str) -> Result<Self, TypeError> {
        let fields: Vec<&str> = key.split(' ').collect();
        if fields.len() != 4 || fields.iter().any(|f| f.is_empty()) {
            return Err(TypeError::InvalidPackageKey(format!(
                "expected 'P<arch> <name> <version> <hash>', got '{key}'"
            )));
        }
        if !fields[0].starts_with('P') || fields[0].len() < 2 {
            return Err(TypeError::InvalidPackageKey(format!(
                "key must start with 'P<arch>': '{key}'"
            )));
        }
        Ok(Self(key.to_string()))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The package name field.
    pub fn name(&self) -> &str {
        self.0.split(' ').nth(1).unwrap_or_default()
    }

    /// The architecture field (without the `P` prefix).
    pub fn arch(&self) -> &str {
        self.0
            .split(' ')
            .next()
            .and_then(|f| f.strip_prefix('P'))
            .unwrap_or_default()
    }

    /// The version field.
    pub fn version(&self) -> &str {
        self.0.split(' ').nth(2).unwrap_or_default()
    }
}

impl TryFrom<String> for PackageKey {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PackageKey> for String {
    fn from(key: PackageKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for PackageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A UTC timestamp.
///
/// # Example
///
/// ```
/// use repogate::core::types::UtcTimestamp;
///
/// let now = UtcTimestamp::now();
/// println!("Current time: {}", now);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtcTimestamp(chrono::DateTime<chrono::Utc>);

impl UtcTimestamp {
    /// Create a timestamp for the current moment.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Get the underlying datetime.
    pub fn as_datetime(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.0
    }
}

impl std::fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
