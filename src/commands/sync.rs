//! # Sync Command Implementation
//!
//! This module implements the `sync` subcommand, which fetches every
//! registered repository, applies the labs its catalog lists, reloads the lab
//! backend once, and repairs local access to the platform.
//!
//! A run that fails for some entries or sources still applies everything
//! else; the command only exits non-zero when nothing could be applied and
//! something failed, or when the run could not start at all.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;

use labsync::config::RunConfig;
use labsync::defaults::{self, WORKSPACE_ROOT_ENV};
use labsync::output::{emoji, render_sync_report, OutputConfig};
use labsync::registry::Registry;
use labsync::sync::Synchronizer;

/// Apply the labs of every registered repository to the cluster
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Do not check or restore local port forwards after the reload.
    #[arg(long)]
    pub skip_port_forward: bool,

    /// List every applied lab and every healthy access path.
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory fetched repositories are checked out under.
    ///
    /// Defaults to the system temporary directory.
    #[arg(long, value_name = "DIR", env = WORKSPACE_ROOT_ENV)]
    pub workspace_root: Option<PathBuf>,

    /// Seconds to wait for the backend to finish reloading.
    #[arg(long, value_name = "SECS", default_value_t = defaults::RELOAD_TIMEOUT.as_secs())]
    pub reload_timeout: u64,
}

/// Builds the run configuration shared by `sync` and `apply`.
pub(crate) fn run_config(skip_port_forward: bool, verbose: bool, reload_timeout: u64) -> RunConfig {
    RunConfig::default()
        .with_verbose(verbose)
        .with_progress(console::Term::stderr().is_term())
        .with_skip_access(skip_port_forward)
        .with_reload_timeout(Duration::from_secs(reload_timeout))
}

/// Execute the `sync` command.
pub fn execute(args: SyncArgs, color_flag: &str, registry: Registry) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let config = run_config(args.skip_port_forward, args.verbose, args.reload_timeout);
    let workspace_root = args
        .workspace_root
        .unwrap_or_else(defaults::default_workspace_root);

    println!(
        "{} Synchronizing repositories from {}",
        emoji(&out, "🔄", "[SYNC]"),
        registry.path().display()
    );

    let synchronizer = Synchronizer::new(registry, workspace_root, config);
    let report = synchronizer.sync_all()?;
    print!("{}", render_sync_report(&out, &report, synchronizer.config()));

    if !report.is_success() {
        bail!(
            "No labs were applied ({} failure(s))",
            report.total_failed()
        );
    }
    Ok(())
}
