//! Command-line interface for gitctx.
//!
//! # Commands
//!
//! - `resolve` - resolve a remote reference and print its build context
//!
//! # Global Options
//!
//! - `--verbose` / `-v` - debug logging (`RUST_LOG` wins when set)
//! - `--config` / `-c` - path to a configuration file
//!
//! # Example
//!
//! ```bash
//! gitctx resolve github.com/acme/monorepo/services/api:main+build
//! gitctx resolve --json 'github.com/acme/repo:v1.2.0+@dockerfile:'
//! ```

mod resolve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub use resolve::ResolveCommand;

/// Top-level CLI.
#[derive(Parser, Debug)]
#[command(
    name = "gitctx",
    about = "Resolve remote git references into build contexts",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file (defaults to `~/.gitctx/config.toml`)
    #[arg(short, long, global = true, env = "GITCTX_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a reference like `github.com/owner/repo/dir:ref+target`.
    Resolve(ResolveCommand),
}

impl Cli {
    /// Initialize logging and run the selected command.
    pub async fn execute(self) -> Result<()> {
        self.init_logging();
        match self.command {
            Commands::Resolve(cmd) => cmd.execute(self.config).await,
        }
    }

    fn init_logging(&self) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if self.verbose {
            EnvFilter::new("gitctx=debug")
        } else {
            EnvFilter::new("gitctx=warn")
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(self.verbose)
            .without_time()
            .try_init();
    }
}
