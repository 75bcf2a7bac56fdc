//! # Reload Coordinator
//!
//! The lab backend only reads lab definitions at start-up, so newly applied
//! labs take effect after a rolling restart of its deployment. The
//! coordinator issues at most one restart per run, and only when something
//! was applied, then waits (bounded) for the rollout to complete.
//!
//! Every failure here is soft: the labs are already applied, so the outcome
//! is reported together with the manual restart command and the run goes on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::cluster::{ControlPlane, RolloutState};
use crate::config::RunConfig;
use crate::pipeline::BatchResult;
use crate::progress;
use crate::wait::{sleep_unless_cancelled, wait_until, CancelToken, PollStatus, WaitOutcome};

/// Outcome of [`ReloadCoordinator::reload_if_needed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Nothing was applied, so no reload was requested.
    Skipped,
    /// The rollout completed.
    Confirmed { elapsed: Duration },
    /// The restart was requested but completion was not observed in time.
    Unconfirmed { reason: String, manual: String },
    /// The restart request itself failed.
    RequestFailed { reason: String, manual: String },
}

impl ReloadOutcome {
    /// Whether a restart request was issued (successfully or not).
    pub fn was_requested(&self) -> bool {
        !matches!(self, ReloadOutcome::Skipped)
    }

    /// Manual remediation for a soft failure.
    pub fn manual_step(&self) -> Option<&str> {
        match self {
            ReloadOutcome::Unconfirmed { manual, .. }
            | ReloadOutcome::RequestFailed { manual, .. } => Some(manual),
            _ => None,
        }
    }
}

/// Triggers and observes backend reloads.
pub struct ReloadCoordinator {
    control_plane: Arc<dyn ControlPlane>,
    config: RunConfig,
    cancel: CancelToken,
}

impl ReloadCoordinator {
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: RunConfig) -> Self {
        Self {
            control_plane,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Token that aborts an in-progress wait.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Restarts the backend once if `batch` applied anything and waits for
    /// the rollout to finish.
    pub fn reload_if_needed(&self, batch: &BatchResult) -> ReloadOutcome {
        if batch.applied_names.is_empty() {
            info!("no labs applied, skipping backend reload");
            return ReloadOutcome::Skipped;
        }

        let namespace = &self.config.namespace;
        let deployment = &self.config.backend_deployment;
        let manual = self.config.manual_restart_command();

        info!(
            "restarting {}/{} to load {} lab(s)",
            namespace,
            deployment,
            batch.applied_names.len()
        );
        if let Err(e) = self.control_plane.restart_deployment(namespace, deployment) {
            warn!("backend restart failed: {}", e);
            return ReloadOutcome::RequestFailed {
                reason: e.to_string(),
                manual,
            };
        }

        let start = Instant::now();
        let per_poll = self.config.reload_poll_interval.max(Duration::from_secs(1));
        let progress = progress::notifier(
            self.config.show_progress,
            &format!("Waiting for {} to reload", deployment),
        );

        let outcome = wait_until(
            self.config.reload_timeout,
            self.config.reload_poll_interval,
            &self.cancel,
            progress.as_ref(),
            || {
                Ok(
                    match self
                        .control_plane
                        .rollout_status(namespace, deployment, per_poll)?
                    {
                        RolloutState::Complete => PollStatus::Ready(()),
                        RolloutState::InProgress(status) => PollStatus::Pending(status),
                    },
                )
            },
        );

        match outcome {
            WaitOutcome::Ready(()) => {
                progress.finish("Backend reloaded");
                let elapsed = start.elapsed();
                info!("backend reload confirmed after {:?}", elapsed);
                if !self.config.settle_delay.is_zero() {
                    sleep_unless_cancelled(self.config.settle_delay, &self.cancel);
                }
                ReloadOutcome::Confirmed { elapsed }
            }
            WaitOutcome::TimedOut {
                elapsed,
                last_status,
            } => {
                progress.finish("Backend reload not confirmed");
                let reason = format!(
                    "rollout not confirmed after {}s{}",
                    elapsed.as_secs(),
                    last_status
                        .map(|s| format!(" (last status: {})", s))
                        .unwrap_or_default()
                );
                warn!("{}", reason);
                ReloadOutcome::Unconfirmed { reason, manual }
            }
            WaitOutcome::Cancelled => {
                progress.finish("Backend reload wait cancelled");
                ReloadOutcome::Unconfirmed {
                    reason: "wait cancelled".to_string(),
                    manual,
                }
            }
        }
    }
}
