//! serve command - Run the HTTP API

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::config::{Config, Overrides};
use crate::observability::init_logging;
use crate::server::Server;

/// Load config, install logging and serve until a shutdown signal.
pub fn serve(
    config_path: Option<&Path>,
    debug: bool,
    listen: Option<SocketAddr>,
    root_dir: Option<PathBuf>,
    no_lock: bool,
) -> Result<()> {
    let config = Config::load(config_path)
        .context("Failed to load config")?
        .with_overrides(Overrides {
            root_dir,
            listen,
            // An absent flag leaves the file's setting alone.
            no_lock: no_lock.then_some(true),
            debug,
        });

    init_logging(config.log_format(), config.debug());
    if let Some(path) = config.loaded_from() {
        tracing::debug!(path = %path.display(), "loaded config");
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    rt.block_on(Server::new(config).run())?;
    Ok(())
}
