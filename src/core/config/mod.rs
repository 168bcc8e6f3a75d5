//! core::config
//!
//! Configuration schema and loading.
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Config file
//! 3. CLI flags (applied through [`Overrides`])
//!
//! # Config Locations
//!
//! Searched in order:
//! 1. An explicit `--config` path (must exist)
//! 2. `$REPOGATE_CONFIG` if set
//! 3. `$XDG_CONFIG_HOME/repogate/config.toml`
//! 4. `~/.repogate/config.toml` (canonical write location)
//!
//! # Example
//!
//! ```no_run
//! use repogate::core::config::Config;
//!
//! let config = Config::load(None).unwrap();
//! println!("Serving {} on {}", config.root_dir().display(), config.listen());
//! ```

pub mod schema;

pub use schema::{FileConfig, LogSection, StoreSection};

use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Default wait for the OS lock when opening the store.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for the arbiter's reply to an acquire.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default flush period in persistent-open mode.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("home directory not found")]
    NoHomeDir,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub root_dir: Option<PathBuf>,
    pub listen: Option<SocketAddr>,
    pub no_lock: Option<bool>,
    pub debug: bool,
}

/// Merged configuration from all sources.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Parsed config file (defaults if none was found)
    pub file: FileConfig,
    /// CLI overrides
    overrides: Overrides,
    /// Path the file was loaded from
    loaded_from: Option<PathBuf>,
}

impl Config {
    /// Load configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `explicit` is given but missing, or if a config
    /// file exists but cannot be parsed or fails validation. Missing files
    /// at the default locations are not an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, loaded_from) = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                (Self::read_config(path)?, Some(path.to_path_buf()))
            }
            None => Self::load_default()?,
        };

        file.validate()?;

        Ok(Self {
            file,
            overrides: Overrides::default(),
            loaded_from,
        })
    }

    /// Build a config from an in-memory file, bypassing discovery.
    pub fn from_file(file: FileConfig) -> Result<Self, ConfigError> {
        file.validate()?;
        Ok(Self {
            file,
            ..Default::default()
        })
    }

    /// Apply CLI overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    fn load_default() -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
        if let Ok(path) = std::env::var("REPOGATE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok((Self::read_config(&path)?, Some(path)));
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("repogate/config.toml");
            if path.exists() {
                return Ok((Self::read_config(&path)?, Some(path)));
            }
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join(".repogate/config.toml");
            if path.exists() {
                return Ok((Self::read_config(&path)?, Some(path)));
            }
        }

        Ok((FileConfig::default(), None))
    }

    fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Get the canonical path for the config file.
    ///
    /// Returns `~/.repogate/config.toml`.
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".repogate/config.toml"))
    }

    /// Write a config file atomically.
    ///
    /// Creates parent directories if needed; writes a temp file and renames
    /// it into place so a crash never leaves a half-written config.
    pub fn write_atomic(path: &Path, config: &FileConfig) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let contents =
            toml::to_string_pretty(config).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let temp_path = path.with_extension("toml.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        file.write_all(contents.as_bytes())
            .map_err(|e| ConfigError::WriteError {
                path: temp_path.clone(),
                source: e,
            })?;

        file.sync_all().map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        fs::rename(&temp_path, path).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    // =========================================================================
    // Accessor methods with precedence
    // =========================================================================

    fn store(&self) -> Option<&StoreSection> {
        self.file.store.as_ref()
    }

    /// Store root directory.
    ///
    /// Defaults to `~/.repogate/root`, or `./repogate-root` without a home dir.
    pub fn root_dir(&self) -> PathBuf {
        if let Some(root) = &self.overrides.root_dir {
            return root.clone();
        }
        if let Some(root) = &self.file.root_dir {
            return PathBuf::from(root);
        }
        dirs::home_dir()
            .map(|home| home.join(".repogate/root"))
            .unwrap_or_else(|| PathBuf::from("repogate-root"))
    }

    /// HTTP listen address.
    ///
    /// Defaults to `127.0.0.1:8080`.
    pub fn listen(&self) -> SocketAddr {
        if let Some(addr) = self.overrides.listen {
            return addr;
        }
        self.file
            .listen
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)))
    }

    /// Whether the store is opened per request burst (reference-counted)
    /// instead of for the whole process lifetime.
    ///
    /// Defaults to `false`.
    pub fn no_lock(&self) -> bool {
        self.overrides
            .no_lock
            .or_else(|| self.store().and_then(|s| s.no_lock))
            .unwrap_or(false)
    }

    /// Wait for the OS lock when opening the store.
    pub fn open_timeout(&self) -> Duration {
        self.store()
            .and_then(|s| s.open_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_OPEN_TIMEOUT)
    }

    /// Wait for the arbiter's reply to an acquire.
    pub fn acquire_timeout(&self) -> Duration {
        self.store()
            .and_then(|s| s.acquire_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT)
    }

    /// Flush period in persistent-open mode.
    pub fn flush_interval(&self) -> Duration {
        self.store()
            .and_then(|s| s.flush_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_FLUSH_INTERVAL)
    }

    /// Log output format; `--debug` forces pretty output.
    pub fn log_format(&self) -> LogFormat {
        if self.overrides.debug {
            return LogFormat::Pretty;
        }
        match self.file.log.as_ref().and_then(|l| l.format.as_deref()) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }

    /// Whether debug logging was requested.
    pub fn debug(&self) -> bool {
        self.overrides.debug
    }

    /// Get the path the config file was loaded from.
    pub fn loaded_from(&self) -> Option<&Path> {
        self.loaded_from.as_deref()
    }

    /// The settings in effect, with every default filled in.
    pub fn effective(&self) -> FileConfig {
        FileConfig {
            root_dir: Some(self.root_dir().display().to_string()),
            listen: Some(self.listen().to_string()),
            store: Some(StoreSection {
                no_lock: Some(self.no_lock()),
                open_timeout_ms: Some(millis(self.open_timeout())),
                acquire_timeout_ms: Some(millis(self.acquire_timeout())),
                flush_interval_ms: Some(millis(self.flush_interval())),
            }),
            log: Some(LogSection {
                format: Some(
                    match self.log_format() {
                        LogFormat::Pretty => "pretty",
                        LogFormat::Json => "json",
                    }
                    .to_string(),
                ),
            }),
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
