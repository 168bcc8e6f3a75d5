//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! - `--config <path>`: Read this config file instead of searching
//! - `--debug`: Enable debug logging

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// repogate - package-repository HTTP service over a single-writer store
#[derive(Parser, Debug)]
#[command(name = "repogate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to load (skips discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API
    #[command(
        long_about = "Run the HTTP API until SIGINT or SIGTERM.\n\n\
            By default the store is opened once and held for the lifetime of \
            the process. With --no-lock it is opened on the first request of a \
            burst and closed when the last one finishes, so other tools can \
            take the store lock between bursts."
    )]
    Serve {
        /// Address to listen on
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Store root directory
        #[arg(long)]
        root_dir: Option<PathBuf>,

        /// Open the store only while requests are in flight
        #[arg(long)]
        no_lock: bool,
    },

    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a config file with every default filled in
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        /// Where to write (defaults to ~/.repogate/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from([
            "repogate",
            "serve",
            "--listen",
            "0.0.0.0:9000",
            "--root-dir",
            "/srv/repo",
            "--no-lock",
        ])
        .unwrap();
        match cli.command {
            Command::Serve {
                listen,
                root_dir,
                no_lock,
            } => {
                assert_eq!(listen, Some("0.0.0.0:9000".parse().unwrap()));
                assert_eq!(root_dir, Some(PathBuf::from("/srv/repo")));
                assert!(no_lock);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["repogate", "config", "show", "--debug"]).unwrap();
        assert!(cli.debug);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        assert!(Cli::try_parse_from(["repogate", "serve", "--listen", "nope"]).is_err());
    }
}
