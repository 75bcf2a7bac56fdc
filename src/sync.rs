//! # Synchronization Runs
//!
//! The [`Synchronizer`] drives a full run:
//!
//! 1. read the registry (unreadable registry aborts the run),
//! 2. for each source in registry order: fetch, read and validate the
//!    catalog, apply its entries, destroy the workspace,
//! 3. reload the backend once if anything was applied,
//! 4. repair local access if a reload was issued.
//!
//! Failures of a single source or entry become report data. The run only
//! returns an error for fatal conditions (see [`Error::is_fatal`]).
//!
//! It also provides the two single-lab entry points: applying one named lab
//! from a remote catalog, and applying a local lab file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::access::{AccessReconciler, ReconcileReport};
use crate::catalog::{self, LabDefinition, LabEntry, Manifest};
use crate::cluster::{ControlPlane, Kubectl};
use crate::config::RunConfig;
use crate::error::{Error, Result, ValidationError};
use crate::pipeline::{BatchResult, LabPipeline, SKIPPED_UNREACHABLE};
use crate::registry::{Registry, RepositoryDescriptor};
use crate::reload::{ReloadCoordinator, ReloadOutcome};
use crate::repository::SourceFetcher;
use crate::workspace::Workspace;

/// What happened to one source during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    /// The catalog was applied; individual entries may still have failed.
    Processed(BatchResult),
    /// The source could not be fetched or its catalog was unusable.
    Failed(String),
    /// The source was not attempted.
    Skipped(String),
}

/// Outcome for one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub descriptor: RepositoryDescriptor,
    pub status: SourceStatus,
}

impl SourceReport {
    pub fn repo_name(&self) -> String {
        self.descriptor.display_name()
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub sources: Vec<SourceReport>,
    pub reload: ReloadOutcome,
    /// `None` when access reconciliation did not run.
    pub access: Option<ReconcileReport>,
    /// The control plane was lost part way through.
    pub interrupted: bool,
}

impl SyncReport {
    /// Applied labs as `"<lab> (from <repo>)"`, in application order.
    pub fn applied_names(&self) -> Vec<String> {
        self.batches()
            .flat_map(|(source, batch)| {
                let repo = source.repo_name();
                batch
                    .applied_names
                    .iter()
                    .map(move |name| qualified(name, &repo))
            })
            .collect()
    }

    /// Failed entries as `("<lab> (from <repo>)", cause)`.
    pub fn failed_entries(&self) -> Vec<(String, String)> {
        self.batches()
            .flat_map(|(source, batch)| {
                let repo = source.repo_name();
                batch
                    .failures
                    .iter()
                    .map(move |f| (qualified(&f.entry.name, &repo), f.cause.clone()))
            })
            .collect()
    }

    pub fn total_applied(&self) -> usize {
        self.batches().map(|(_, b)| b.applied_count()).sum()
    }

    /// Failed entries plus sources that failed or were skipped.
    pub fn total_failed(&self) -> usize {
        self.sources
            .iter()
            .map(|s| match &s.status {
                SourceStatus::Processed(batch) => batch.failed_count(),
                SourceStatus::Failed(_) | SourceStatus::Skipped(_) => 1,
            })
            .sum()
    }

    /// A run that applied anything is a (possibly partial) success.
    pub fn is_success(&self) -> bool {
        self.total_applied() > 0 || self.total_failed() == 0
    }

    fn batches(&self) -> impl Iterator<Item = (&SourceReport, &BatchResult)> {
        self.sources.iter().filter_map(|s| match &s.status {
            SourceStatus::Processed(batch) => Some((s, batch)),
            _ => None,
        })
    }
}

/// Outcome of applying a single local lab file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabFileReport {
    pub definition: LabDefinition,
    /// Summary line returned by the control plane.
    pub applied: String,
    pub reload: ReloadOutcome,
    pub access: Option<ReconcileReport>,
}

fn qualified(lab: &str, repo: &str) -> String {
    format!("{} (from {})", lab, repo)
}

/// Runs synchronizations against one registry and one cluster.
pub struct Synchronizer {
    registry: Registry,
    fetcher: SourceFetcher,
    control_plane: Arc<dyn ControlPlane>,
    pipeline: LabPipeline,
    reload: ReloadCoordinator,
    access: AccessReconciler,
    config: RunConfig,
}

impl Synchronizer {
    /// Creates a synchronizer using `git`, `kubectl`, and local forwarding.
    pub fn new(registry: Registry, workspace_root: PathBuf, config: RunConfig) -> Self {
        let control_plane: Arc<dyn ControlPlane> = Arc::new(Kubectl::new(config.command_timeout));
        let fetcher = SourceFetcher::new(workspace_root, config.git_timeout);
        let access = AccessReconciler::new(control_plane.clone(), &config);
        Self::with_components(registry, fetcher, control_plane, access, config)
    }

    /// Creates a synchronizer from explicit components.
    pub fn with_components(
        registry: Registry,
        fetcher: SourceFetcher,
        control_plane: Arc<dyn ControlPlane>,
        access: AccessReconciler,
        config: RunConfig,
    ) -> Self {
        Self {
            pipeline: LabPipeline::new(control_plane.clone(), config.scratch_dir.clone()),
            reload: ReloadCoordinator::new(control_plane.clone(), config.clone()),
            registry,
            fetcher,
            control_plane,
            access,
            config,
        }
    }

    /// The settings this synchronizer runs with.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Synchronizes every registered source.
    pub fn sync_all(&self) -> Result<SyncReport> {
        let descriptors = self.registry.list()?;
        info!("synchronizing {} source(s)", descriptors.len());

        let mut sources = Vec::with_capacity(descriptors.len());
        let mut interrupted = false;
        let mut applied_so_far = 0;

        for descriptor in descriptors {
            if interrupted {
                warn!("source {} {}", descriptor.url, SKIPPED_UNREACHABLE);
                sources.push(SourceReport {
                    descriptor,
                    status: SourceStatus::Skipped(SKIPPED_UNREACHABLE.to_string()),
                });
                continue;
            }

            let status = match self.process_source(&descriptor) {
                Ok(batch) => {
                    interrupted = batch.interrupted;
                    applied_so_far += batch.applied_count();
                    SourceStatus::Processed(batch)
                }
                // Nothing applied yet: there is nothing to salvage.
                Err(e) if e.is_fatal() && applied_so_far == 0 => return Err(e),
                Err(e) => {
                    warn!("source {} failed: {}", descriptor.url, e);
                    interrupted = matches!(e, Error::ControlPlaneUnavailable { .. });
                    SourceStatus::Failed(e.to_string())
                }
            };
            sources.push(SourceReport { descriptor, status });
        }

        let combined = BatchResult {
            applied_names: sources
                .iter()
                .filter_map(|s| match &s.status {
                    SourceStatus::Processed(batch) => Some(batch),
                    _ => None,
                })
                .flat_map(|batch| batch.applied_names.iter().cloned())
                .collect(),
            ..Default::default()
        };
        let (reload, access) = self.finish(&combined);

        Ok(SyncReport {
            sources,
            reload,
            access,
            interrupted,
        })
    }

    /// Fetches one repository and applies only the lab called `lab`.
    pub fn apply_named_lab(
        &self,
        descriptor: &RepositoryDescriptor,
        lab: &str,
    ) -> Result<SyncReport> {
        let descriptor = descriptor.clone().normalized();
        let mut workspace = self.fetcher.fetch(&descriptor.url, &descriptor.branch)?;

        let result = self
            .read_manifest(&workspace, &descriptor)
            .and_then(|manifest| {
                let entry = locate_entry(&manifest, lab, &descriptor.url)?;
                self.pipeline.apply_batch(&workspace, &[entry])
            });
        workspace.destroy();
        let batch = result?;

        let (reload, access) = self.finish(&batch);
        Ok(SyncReport {
            interrupted: batch.interrupted,
            sources: vec![SourceReport {
                descriptor,
                status: SourceStatus::Processed(batch),
            }],
            reload,
            access,
        })
    }

    /// Applies a local lab file after checking it and the backend.
    pub fn apply_lab_file(&self, path: &Path) -> Result<LabFileReport> {
        if !path.is_file() {
            return Err(Error::ArtifactNotFound {
                path: path.display().to_string(),
            });
        }
        let content = fs::read(path)?;
        let definition = catalog::inspect_lab_file(path, &content)?;

        self.control_plane.ensure_reachable()?;
        let readiness = self
            .control_plane
            .pod_readiness(&self.config.namespace, &self.config.backend_selector)?;
        if !readiness.ready {
            return Err(Error::BackendNotReady {
                message: readiness.detail,
            });
        }

        let applied = self.control_plane.apply(path)?;
        info!("applied lab {} from {}", definition.id, path.display());

        let batch = BatchResult {
            applied_names: vec![definition.id.clone()],
            ..Default::default()
        };
        let (reload, access) = self.finish(&batch);
        Ok(LabFileReport {
            definition,
            applied,
            reload,
            access,
        })
    }

    fn process_source(&self, descriptor: &RepositoryDescriptor) -> Result<BatchResult> {
        let mut workspace = self.fetcher.fetch(&descriptor.url, &descriptor.branch)?;
        let result = self
            .read_manifest(&workspace, descriptor)
            .and_then(|manifest| {
                catalog::validate(&manifest)?;
                info!(
                    "catalog '{}' from {} lists {} lab(s)",
                    manifest.name,
                    descriptor.url,
                    manifest.entries.len()
                );
                self.pipeline.apply_batch(&workspace, &manifest.entries)
            });
        workspace.destroy();
        result
    }

    fn read_manifest(
        &self,
        workspace: &Workspace,
        descriptor: &RepositoryDescriptor,
    ) -> Result<Manifest> {
        let bytes = workspace
            .read_file(&descriptor.manifest_path)
            .map_err(|e| match e {
                Error::ArtifactNotFound { path } => Error::ManifestParse {
                    message: format!("catalog manifest {} not found", path),
                },
                other => other,
            })?;
        catalog::parse(&bytes)
    }

    fn finish(&self, batch: &BatchResult) -> (ReloadOutcome, Option<ReconcileReport>) {
        let reload = self.reload.reload_if_needed(batch);
        let access = if reload.was_requested() && !self.config.skip_access {
            Some(self.access.reconcile())
        } else {
            None
        };
        (reload, access)
    }
}

fn locate_entry(manifest: &Manifest, lab: &str, url: &str) -> Result<LabEntry> {
    let entry = manifest
        .find_entry(lab)
        .cloned()
        .ok_or_else(|| Error::LabNotFound {
            name: lab.to_string(),
            url: url.to_string(),
        })?;
    if entry.path.trim().is_empty() {
        return Err(ValidationError::EntryMissingPath { name: entry.name }.into());
    }
    Ok(entry)
}
