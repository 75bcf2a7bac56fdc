//! CLI argument parsing and command dispatch

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;

use labsync::defaults::REGISTRY_ENV;
use labsync::registry::Registry;

use crate::commands;

/// labsync - Synchronize external lab catalogs into a local training-lab cluster
#[derive(Parser, Debug)]
#[command(name = "labsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace). `RUST_LOG` takes precedence.
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    /// Path of the repository registry file.
    ///
    /// Defaults to `~/.labsync/registry.yaml`.
    #[arg(long, global = true, value_name = "FILE", env = REGISTRY_ENV)]
    registry: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the registry of external lab repositories
    Repo(commands::repo::RepoArgs),

    /// Fetch every registered repository and apply its labs to the cluster
    Sync(commands::sync::SyncArgs),

    /// Apply a single lab from a repository or a local lab file
    Apply(commands::apply::ApplyArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        // RUST_LOG wins over --log-level when set
        env_logger::Builder::from_env(Env::default().default_filter_or(&self.log_level))
            .format_timestamp(None)
            .try_init()
            .ok();

        let registry = match self.registry {
            Some(path) => Registry::new(path),
            None => Registry::at_default_location(),
        };

        match self.command {
            Commands::Repo(args) => commands::repo::execute(args, &self.color, registry),
            Commands::Sync(args) => commands::sync::execute(args, &self.color, registry),
            Commands::Apply(args) => commands::apply::execute(args, &self.color, registry),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}
