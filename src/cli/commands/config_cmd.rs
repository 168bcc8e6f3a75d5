//! config command - Show or create the config file

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::core::config::{Config, Overrides};

/// Print the effective configuration as TOML.
pub fn show(config_path: Option<&Path>, debug: bool) -> Result<()> {
    let config = Config::load(config_path)
        .context("Failed to load config")?
        .with_overrides(Overrides {
            debug,
            ..Overrides::default()
        });

    match config.loaded_from() {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# no config file found; showing defaults"),
    }
    let rendered = toml::to_string_pretty(&config.effective())
        .context("Failed to render config")?;
    print!("{rendered}");
    Ok(())
}

/// Write a config file holding the defaults.
pub fn init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }

    let defaults = Config::default().effective();
    Config::write_atomic(&path, &defaults)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
