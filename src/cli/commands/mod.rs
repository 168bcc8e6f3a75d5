//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! `serve` is async; it builds its own tokio runtime so the rest of the
//! CLI stays synchronous.

mod config_cmd;
mod serve;

pub use config_cmd::{init, show};
pub use serve::serve;

use anyhow::Result;

use super::args::{Cli, Command, ConfigAction};

/// Dispatch a parsed command line to its handler.
pub fn dispatch(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Serve {
            listen,
            root_dir,
            no_lock,
        } => serve(config_path, cli.debug, listen, root_dir, no_lock),
        Command::Config { action } => match action {
            ConfigAction::Show => show(config_path, cli.debug),
            ConfigAction::Init { force, path } => init(path, force),
        },
    }
}
