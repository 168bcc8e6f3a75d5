//! cli
//!
//! Command-line interface layer for repogate.
//!
//! The CLI is thin: it parses arguments via clap, loads configuration and
//! hands off to [`crate::server`] or the config helpers.

pub mod args;
pub mod commands;

pub use args::Cli;

use anyhow::Result;

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    commands::dispatch(cli)
}
