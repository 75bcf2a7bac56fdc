//! # Repo Command Implementation
//!
//! This module implements the `repo` subcommand family, which manages the
//! registry of external lab repositories:
//!
//! - `repo add <URL>` registers a repository, or updates it in place if the
//!   url is already registered. GitHub shorthand (`org/repo`) is expanded.
//! - `repo list` prints the registered repositories in registry order.
//! - `repo remove <URL>` unregisters a repository.
//! - `repo clear` unregisters every repository after confirmation.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use dialoguer::{theme::ColorfulTheme, Confirm};

use labsync::git;
use labsync::output::{emoji, render_descriptor, OutputConfig};
use labsync::registry::{Registry, RepositoryDescriptor, UpsertOutcome};

/// Manage the registry of external lab repositories
#[derive(Args, Debug)]
pub struct RepoArgs {
    #[command(subcommand)]
    pub command: RepoCommand,
}

#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Register a repository, or update an existing registration
    Add(AddArgs),

    /// List registered repositories
    #[command(alias = "ls")]
    List,

    /// Unregister a repository
    #[command(alias = "rm")]
    Remove(RemoveArgs),

    /// Unregister every repository
    Clear(ClearArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Repository URL (e.g. https://github.com/org/labs, or org/labs for GitHub)
    #[arg(value_name = "URL")]
    pub url: String,

    /// Branch to fetch (defaults to "main")
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Path of the catalog manifest inside the repository (defaults to "girus-labs.yaml")
    #[arg(short, long, value_name = "PATH")]
    pub manifest: Option<String>,

    /// Free-form description shown by `repo list`
    #[arg(short, long)]
    pub description: Option<String>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// URL of the repository to unregister
    #[arg(value_name = "URL")]
    pub url: String,
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Execute the `repo` command.
pub fn execute(args: RepoArgs, color_flag: &str, registry: Registry) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    match args.command {
        RepoCommand::Add(add) => execute_add(add, &out, &registry),
        RepoCommand::List => execute_list(&out, &registry),
        RepoCommand::Remove(remove) => execute_remove(remove, &out, &registry),
        RepoCommand::Clear(clear) => execute_clear(clear, &out, &registry),
    }
}

fn execute_add(args: AddArgs, out: &OutputConfig, registry: &Registry) -> Result<()> {
    let url = git::normalize_url(&args.url)?;

    let mut descriptor = RepositoryDescriptor::new(url);
    if let Some(branch) = args.branch {
        descriptor = descriptor.with_branch(branch);
    }
    if let Some(manifest) = args.manifest {
        descriptor = descriptor.with_manifest_path(manifest);
    }
    if let Some(description) = args.description {
        descriptor = descriptor.with_description(description);
    }
    let descriptor = descriptor.normalized();

    let verb = match registry.upsert(descriptor.clone())? {
        UpsertOutcome::Added => "Added",
        UpsertOutcome::Updated => "Updated",
    };
    println!(
        "{} {} {}",
        emoji(out, "✅", "[OK]"),
        verb,
        render_descriptor(&descriptor)
    );
    println!(
        "{} Run `labsync sync` to apply its labs",
        emoji(out, "💡", "[TIP]")
    );
    Ok(())
}

fn execute_list(out: &OutputConfig, registry: &Registry) -> Result<()> {
    let descriptors = registry.list()?;
    if descriptors.is_empty() {
        println!(
            "{} No repositories registered. Add one with `labsync repo add <URL>`.",
            emoji(out, "ℹ️ ", "[INFO]")
        );
        return Ok(());
    }

    for (index, descriptor) in descriptors.iter().enumerate() {
        println!("{}. {}", index + 1, render_descriptor(descriptor));
    }
    Ok(())
}

fn execute_remove(args: RemoveArgs, out: &OutputConfig, registry: &Registry) -> Result<()> {
    let mut removed = registry.remove(&args.url)?;
    if !removed {
        // Accept the same shorthand `repo add` does
        if let Ok(url) = git::normalize_url(&args.url) {
            removed = registry.remove(&url)?;
        }
    }

    if removed {
        println!("{} Removed {}", emoji(out, "🗑️ ", "[OK]"), args.url.trim());
    } else {
        println!(
            "{} {} is not registered, nothing to remove",
            emoji(out, "ℹ️ ", "[INFO]"),
            args.url.trim()
        );
    }
    Ok(())
}

fn execute_clear(args: ClearArgs, out: &OutputConfig, registry: &Registry) -> Result<()> {
    if !args.yes {
        if !console::Term::stdout().is_term() {
            bail!("Refusing to clear the registry without confirmation; pass --yes");
        }

        let theme = ColorfulTheme::default();
        let confirmed = Confirm::with_theme(&theme)
            .with_prompt(format!(
                "Remove every repository from {}?",
                registry.path().display()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let removed = registry.clear()?;
    println!(
        "{} Removed {} repositor{}",
        emoji(out, "🗑️ ", "[OK]"),
        removed,
        if removed == 1 { "y" } else { "ies" }
    );
    Ok(())
}
