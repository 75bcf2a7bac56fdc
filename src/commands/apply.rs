//! # Apply Command Implementation
//!
//! This module implements the `apply` subcommand, which installs a single
//! lab instead of synchronizing whole catalogs. Two sources are supported:
//!
//! - `--repo <URL> --lab <NAME>` fetches the repository and applies only the
//!   named catalog entry. A registered repository keeps its branch and
//!   manifest path unless they are overridden on the command line.
//! - `--file <PATH>` applies a local lab definition file after checking that
//!   it is a lab template and that the backend is running.
//!
//! Either way the backend is reloaded once and access is reconciled, exactly
//! as after a `sync`.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{ArgGroup, Args};

use labsync::defaults::{self, WORKSPACE_ROOT_ENV};
use labsync::git;
use labsync::output::{emoji, render_lab_file_report, render_sync_report, OutputConfig};
use labsync::registry::{Registry, RepositoryDescriptor};
use labsync::sync::Synchronizer;

use super::sync::run_config;

/// Apply a single lab from a repository or a local file
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["file", "repo"])))]
pub struct ApplyArgs {
    /// Local lab definition file to apply.
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Repository URL whose catalog lists the lab.
    #[arg(short, long, value_name = "URL", requires = "lab")]
    pub repo: Option<String>,

    /// Name of the catalog entry to apply.
    #[arg(short, long, value_name = "NAME", requires = "repo")]
    pub lab: Option<String>,

    /// Branch to fetch instead of the registered (or default) one.
    #[arg(short, long, requires = "repo")]
    pub branch: Option<String>,

    /// Catalog manifest path instead of the registered (or default) one.
    #[arg(short, long, value_name = "PATH", requires = "repo")]
    pub manifest: Option<String>,

    /// Do not check or restore local port forwards after the reload.
    #[arg(long)]
    pub skip_port_forward: bool,

    /// Directory the repository is checked out under.
    #[arg(long, value_name = "DIR", env = WORKSPACE_ROOT_ENV)]
    pub workspace_root: Option<PathBuf>,

    /// Seconds to wait for the backend to finish reloading.
    #[arg(long, value_name = "SECS", default_value_t = defaults::RELOAD_TIMEOUT.as_secs())]
    pub reload_timeout: u64,
}

/// Execute the `apply` command.
pub fn execute(args: ApplyArgs, color_flag: &str, registry: Registry) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let config = run_config(args.skip_port_forward, false, args.reload_timeout);
    let workspace_root = args
        .workspace_root
        .clone()
        .unwrap_or_else(defaults::default_workspace_root);

    if let Some(file) = &args.file {
        let synchronizer = Synchronizer::new(registry, workspace_root, config);
        println!(
            "{} Applying lab file {}",
            emoji(&out, "📄", "[FILE]"),
            file.display()
        );
        let report = synchronizer.apply_lab_file(file)?;
        print!("{}", render_lab_file_report(&out, &report));
        return Ok(());
    }

    let (Some(repo), Some(lab)) = (&args.repo, &args.lab) else {
        bail!("Either --file or both --repo and --lab are required");
    };
    let descriptor = resolve_descriptor(&registry, repo, &args)?;

    println!(
        "{} Applying lab '{}' from {}@{}",
        emoji(&out, "📦", "[REPO]"),
        lab,
        descriptor.url,
        descriptor.branch
    );
    let synchronizer = Synchronizer::new(registry, workspace_root, config.with_verbose(true));
    let report = synchronizer.apply_named_lab(&descriptor, lab)?;
    print!("{}", render_sync_report(&out, &report, synchronizer.config()));

    if report.total_applied() == 0 {
        bail!("Lab '{}' could not be applied", lab);
    }
    Ok(())
}

/// Starts from the registered descriptor when the repository is known.
fn resolve_descriptor(
    registry: &Registry,
    repo: &str,
    args: &ApplyArgs,
) -> Result<RepositoryDescriptor> {
    let url = git::normalize_url(repo)?;
    let mut descriptor = registry
        .find(&url)?
        .unwrap_or_else(|| RepositoryDescriptor::new(url));

    if let Some(branch) = &args.branch {
        descriptor = descriptor.with_branch(branch.clone());
    }
    if let Some(manifest) = &args.manifest {
        descriptor = descriptor.with_manifest_path(manifest.clone());
    }
    Ok(descriptor.normalized())
}
