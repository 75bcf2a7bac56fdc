//! # labsync
//!
//! This library synchronizes externally hosted lab catalogs into a local
//! training-lab cluster. It is designed to be used by the `labsync`
//! command-line tool, but every stage sits behind a trait so it can be driven
//! and tested without `git`, `kubectl`, or a network.
//!
//! ## Quick Example
//!
//! ```
//! use labsync::catalog;
//! use labsync::registry::RepositoryDescriptor;
//!
//! let manifest = catalog::load(br#"
//! name: community
//! labs:
//!   - name: intro
//!     path: labs/intro.yaml
//! "#).unwrap();
//! assert_eq!(manifest.entries[0].path, "labs/intro.yaml");
//!
//! let descriptor = RepositoryDescriptor::new("https://example.test/labs.git").normalized();
//! assert_eq!(descriptor.branch, "main");
//! assert_eq!(descriptor.display_name(), "labs");
//! ```
//!
//! ## Core Concepts
//!
//! - **Registry (`registry`)**: The persisted, ordered list of repositories
//!   to synchronize from.
//! - **Fetching (`git`, `repository`, `workspace`)**: Shallow single-branch
//!   clones into scoped, self-deleting workspaces.
//! - **Catalogs (`catalog`)**: Parsing and validating the manifest each
//!   repository publishes, and inspecting local lab files.
//! - **Control plane (`cluster`, `process`)**: `kubectl` calls behind the
//!   [`cluster::ControlPlane`] trait, each with a time budget.
//! - **Application (`pipeline`)**: Applying a catalog's entries in order,
//!   isolating per-entry failures.
//! - **Reload (`reload`, `wait`, `progress`)**: One backend restart per run,
//!   waited on with a bounded, cancellable poll.
//! - **Access (`access`)**: Checking and restoring local port forwards with
//!   an ordered list of fallback strategies.
//!
//! ## Execution Flow
//!
//! [`sync::Synchronizer::sync_all`] reads the registry, then for each
//! repository fetches it, validates its catalog and applies the entries.
//! After all repositories it reloads the backend once if anything was
//! applied and, unless disabled, reconciles local access. The outcome is a
//! [`sync::SyncReport`] that names every failed unit.

pub mod access;
pub mod catalog;
pub mod cluster;
pub mod config;
pub mod defaults;
pub mod error;
pub mod git;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod registry;
pub mod reload;
pub mod repository;
pub mod sync;
pub mod wait;
pub mod workspace;

#[cfg(test)]
mod catalog_proptest;
