//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Location
//!
//! Searched in order of precedence:
//! 1. `--config <path>` on the command line
//! 2. `$REPOGATE_CONFIG` if set
//! 3. `$XDG_CONFIG_HOME/repogate/config.toml`
//! 4. `~/.repogate/config.toml` (canonical write location)
//!
//! # Validation
//!
//! Config values are validated after parsing (listen address must parse,
//! intervals must be non-zero where a zero would spin).

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Service configuration file.
///
/// # Example
///
/// ```toml
/// root_dir = "/var/lib/repogate"
/// listen = "127.0.0.1:8080"
///
/// [store]
/// no_lock = true
/// open_timeout_ms = 5000
/// acquire_timeout_ms = 30000
/// flush_interval_ms = 60000
///
/// [log]
/// format = "json"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Store root directory
    pub root_dir: Option<String>,

    /// HTTP listen address
    pub listen: Option<String>,

    /// Store access settings
    pub store: Option<StoreSection>,

    /// Logging settings
    pub log: Option<LogSection>,
}

impl FileConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(listen) = &self.listen {
            listen.parse::<SocketAddr>().map_err(|e| {
                ConfigError::InvalidValue(format!("invalid listen address '{}': {}", listen, e))
            })?;
        }

        if let Some(root) = &self.root_dir {
            if root.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "root_dir cannot be empty".to_string(),
                ));
            }
        }

        if let Some(store) = &self.store {
            store.validate()?;
        }

        if let Some(log) = &self.log {
            log.validate()?;
        }

        Ok(())
    }
}

/// Store access settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    /// Open the store per request burst instead of holding it for the
    /// process lifetime
    pub no_lock: Option<bool>,

    /// How long opening the store waits for the OS lock
    pub open_timeout_ms: Option<u64>,

    /// How long a request waits for the arbiter before giving up
    pub acquire_timeout_ms: Option<u64>,

    /// Flush period in persistent-open mode
    pub flush_interval_ms: Option<u64>,
}

impl StoreSection {
    /// Validate the store section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acquire_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue(
                "store.acquire_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.flush_interval_ms == Some(0) {
            return Err(ConfigError::InvalidValue(
                "store.flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    /// Output format ("pretty" or "json")
    pub format: Option<String>,
}

impl LogSection {
    /// Valid log formats.
    pub const VALID_FORMATS: &'static [&'static str] = &["pretty", "json"];

    /// Validate the logging section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(format) = &self.format {
            if !Self::VALID_FORMATS.contains(&format.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid log format '{}', must be one of: {}",
                    format,
                    Self::VALID_FORMATS.join(", ")
                )));
            }
        }
        Ok(())
    }
}
