//! # Lab Application Pipeline
//!
//! Applies the entries of one catalog to the cluster, in catalog order, and
//! aggregates the per-entry outcomes into a [`BatchResult`].
//!
//! Entry failures are data, not control flow: a missing artifact or a
//! rejected apply is recorded and the next entry is attempted. The batch
//! only returns an error when the control plane cannot be reached at the
//! start of the batch. If the control plane goes away mid-batch, the entry
//! that hit the failure and every entry after it are recorded as failures
//! and the batch is marked interrupted.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};
use tempfile::{Builder, NamedTempFile};

use crate::catalog::LabEntry;
use crate::cluster::ControlPlane;
use crate::error::{Error, Result};
use crate::workspace::Workspace;

/// Cause recorded for entries not attempted after the control plane was lost.
pub const SKIPPED_UNREACHABLE: &str = "skipped: control plane unreachable";

/// Outcome of applying one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationResult {
    pub entry: LabEntry,
    pub applied: bool,
    pub error: Option<String>,
}

/// A failed entry and why it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub entry: LabEntry,
    pub cause: String,
}

/// Aggregate outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Names of the applied entries, in application order.
    pub applied_names: Vec<String>,
    pub failures: Vec<EntryFailure>,
    /// The control plane was lost before the batch finished.
    pub interrupted: bool,
}

impl BatchResult {
    pub fn record(&mut self, result: ApplicationResult) {
        match result.error {
            None if result.applied => self.applied_names.push(result.entry.name),
            error => self.failures.push(EntryFailure {
                entry: result.entry,
                cause: error.unwrap_or_else(|| "not applied".to_string()),
            }),
        }
    }

    pub fn applied_count(&self) -> usize {
        self.applied_names.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// Applies catalog entries from a workspace to the cluster.
pub struct LabPipeline {
    control_plane: Arc<dyn ControlPlane>,
    scratch_dir: PathBuf,
}

impl LabPipeline {
    /// Creates a pipeline that materializes artifacts under `scratch_dir`.
    pub fn new(control_plane: Arc<dyn ControlPlane>, scratch_dir: PathBuf) -> Self {
        Self {
            control_plane,
            scratch_dir,
        }
    }

    /// Applies `entries` from `workspace` in order.
    pub fn apply_batch(&self, workspace: &Workspace, entries: &[LabEntry]) -> Result<BatchResult> {
        self.control_plane.ensure_reachable()?;

        let mut batch = BatchResult::default();
        let mut remaining = entries.iter();

        for entry in remaining.by_ref() {
            match self.apply_entry(workspace, entry) {
                Ok(summary) => {
                    info!("applied lab {} ({})", entry.name, summary);
                    batch.record(ApplicationResult {
                        entry: entry.clone(),
                        applied: true,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("lab {} failed: {}", entry.name, e);
                    let lost = matches!(e, Error::ControlPlaneUnavailable { .. });
                    batch.record(ApplicationResult {
                        entry: entry.clone(),
                        applied: false,
                        error: Some(e.to_string()),
                    });
                    if lost {
                        batch.interrupted = true;
                        break;
                    }
                }
            }
        }

        for entry in remaining {
            warn!("lab {} {}", entry.name, SKIPPED_UNREACHABLE);
            batch.record(ApplicationResult {
                entry: entry.clone(),
                applied: false,
                error: Some(SKIPPED_UNREACHABLE.to_string()),
            });
        }

        debug!(
            "batch finished: {} applied, {} failed",
            batch.applied_count(),
            batch.failed_count()
        );
        Ok(batch)
    }

    fn apply_entry(&self, workspace: &Workspace, entry: &LabEntry) -> Result<String> {
        if !workspace.exists(&entry.path) {
            return Err(Error::ArtifactNotFound {
                path: entry.path.clone(),
            });
        }
        let content = workspace.read_file(&entry.path)?;

        let staged = self.materialize(&content)?;
        let result = self.control_plane.apply(staged.path());
        if let Err(e) = staged.close() {
            warn!("could not remove staged artifact for {}: {}", entry.name, e);
        }
        result
    }

    fn materialize(&self, content: &[u8]) -> Result<NamedTempFile> {
        let mut staged = Builder::new()
            .prefix("lab-")
            .suffix(".yaml")
            .tempfile_in(&self.scratch_dir)?;
        staged.write_all(content)?;
        staged.flush()?;
        Ok(staged)
    }
}
