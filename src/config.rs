//! # Run Configuration
//!
//! Everything that changes how a synchronization run behaves is carried by a
//! [`RunConfig`] value which the command layer builds once and hands to the
//! components that need it. There is no process-wide mutable state: verbosity,
//! skip flags, names, and timeouts all flow through constructors.
//!
//! ```
//! use labsync::config::RunConfig;
//! use std::time::Duration;
//!
//! let config = RunConfig::default()
//!     .with_verbose(true)
//!     .with_reload_timeout(Duration::from_secs(30));
//! assert!(config.verbose);
//! assert_eq!(config.access.targets.len(), 2);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::defaults;

/// How many times, and how far apart, a forwarding strategy probes for
/// connectivity after launching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Number of probes; at least one probe is always made.
    pub attempts: u32,
    /// Pause between launching and the first probe.
    pub initial_delay: Duration,
    /// Pause between consecutive probes.
    pub spacing: Duration,
}

impl RetryBudget {
    pub const fn new(attempts: u32, initial_delay: Duration, spacing: Duration) -> Self {
        Self {
            attempts,
            initial_delay,
            spacing,
        }
    }

    /// A budget with no pauses, mostly useful in tests.
    pub const fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO, Duration::ZERO)
    }
}

/// One locally forwarded access path to a cluster service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTarget {
    /// Short name used in logs and reports ("backend", "frontend").
    pub name: String,
    /// Service the forward normally binds to.
    pub service: String,
    /// Workload used by the last-resort strategy.
    pub deployment: String,
    /// Local port the forward listens on.
    pub local_port: u16,
    /// Port on the service; resolved from the cluster when `None`.
    pub remote_port: Option<u16>,
    /// Path probed over HTTP to decide whether the path answers.
    pub health_path: String,
}

impl AccessTarget {
    pub fn backend() -> Self {
        Self {
            name: "backend".to_string(),
            service: defaults::BACKEND_NAME.to_string(),
            deployment: defaults::BACKEND_NAME.to_string(),
            local_port: 8080,
            remote_port: Some(8080),
            health_path: "/api/v1/health".to_string(),
        }
    }

    pub fn frontend() -> Self {
        Self {
            name: "frontend".to_string(),
            service: defaults::FRONTEND_NAME.to_string(),
            deployment: defaults::FRONTEND_NAME.to_string(),
            local_port: 8000,
            remote_port: Some(80),
            health_path: "/".to_string(),
        }
    }
}

/// Settings for the access reconciler.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// Address forwards bind to.
    pub bind_address: String,
    /// Host probes connect to.
    pub probe_host: String,
    /// Paths to keep reachable, checked independently.
    pub targets: Vec<AccessTarget>,
    /// Budget of the background service forward.
    pub background: RetryBudget,
    /// Budget of the detached service forward.
    pub detached: RetryBudget,
    /// Budget of the last-resort deployment forward.
    pub deployment: RetryBudget,
    /// Where the detached variant records forwarder pids.
    pub state_dir: PathBuf,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            probe_host: "localhost".to_string(),
            targets: vec![AccessTarget::backend(), AccessTarget::frontend()],
            background: RetryBudget::new(5, Duration::from_secs(1), Duration::from_secs(1)),
            detached: RetryBudget::new(3, Duration::from_secs(3), Duration::from_secs(1)),
            deployment: RetryBudget::new(1, Duration::from_secs(3), Duration::ZERO),
            state_dir: defaults::state_dir(),
        }
    }
}

/// Configuration threaded through a synchronization run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// List applied entries and healthy access paths in reports.
    pub verbose: bool,
    /// Render a spinner while waiting on long operations.
    pub show_progress: bool,
    /// Skip access reconciliation after a reload.
    pub skip_access: bool,
    /// Namespace the lab platform lives in.
    pub namespace: String,
    /// Deployment restarted so the backend re-reads lab definitions.
    pub backend_deployment: String,
    /// Label selector of the backend pods.
    pub backend_selector: String,
    /// Upper bound on waiting for a reload to complete.
    pub reload_timeout: Duration,
    /// Spacing between reload status polls.
    pub reload_poll_interval: Duration,
    /// Pause after a confirmed reload before access is checked.
    pub settle_delay: Duration,
    /// Budget for fetching one source.
    pub git_timeout: Duration,
    /// Budget for one control-plane call.
    pub command_timeout: Duration,
    /// Budget for one HTTP probe.
    pub probe_timeout: Duration,
    /// Directory transient artifacts are materialized in.
    pub scratch_dir: PathBuf,
    /// Access reconciler settings.
    pub access: AccessConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            show_progress: true,
            skip_access: false,
            namespace: defaults::DEFAULT_NAMESPACE.to_string(),
            backend_deployment: defaults::BACKEND_NAME.to_string(),
            backend_selector: format!("app={}", defaults::BACKEND_NAME),
            reload_timeout: defaults::RELOAD_TIMEOUT,
            reload_poll_interval: defaults::RELOAD_POLL_INTERVAL,
            settle_delay: defaults::SETTLE_DELAY,
            git_timeout: defaults::GIT_TIMEOUT,
            command_timeout: defaults::COMMAND_TIMEOUT,
            probe_timeout: defaults::PROBE_TIMEOUT,
            scratch_dir: std::env::temp_dir(),
            access: AccessConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn with_skip_access(mut self, skip_access: bool) -> Self {
        self.skip_access = skip_access;
        self
    }

    pub fn with_reload_timeout(mut self, timeout: Duration) -> Self {
        self.reload_timeout = timeout;
        self
    }

    pub fn with_reload_poll_interval(mut self, interval: Duration) -> Self {
        self.reload_poll_interval = interval;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    pub fn with_access(mut self, access: AccessConfig) -> Self {
        self.access = access;
        self
    }

    /// Manual command that restarts the backend, shown when a reload could
    /// not be confirmed.
    pub fn manual_restart_command(&self) -> String {
        format!(
            "kubectl rollout restart deployment/{} -n {}",
            self.backend_deployment, self.namespace
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_platform_layout() {
        let config = RunConfig::default();
        assert_eq!(config.namespace, "girus");
        assert_eq!(config.backend_deployment, "girus-backend");
        assert_eq!(config.backend_selector, "app=girus-backend");
        assert_eq!(config.reload_timeout, Duration::from_secs(60));
        assert!(!config.skip_access);
    }

    #[test]
    fn test_builder_methods() {
        let config = RunConfig::default()
            .with_verbose(true)
            .with_progress(false)
            .with_skip_access(true)
            .with_settle_delay(Duration::ZERO);
        assert!(config.verbose);
        assert!(!config.show_progress);
        assert!(config.skip_access);
        assert_eq!(config.settle_delay, Duration::ZERO);
    }

    #[test]
    fn test_access_defaults() {
        let access = AccessConfig::default();
        assert_eq!(access.targets[0].local_port, 8080);
        assert_eq!(access.targets[1].local_port, 8000);
        assert_eq!(access.targets[1].remote_port, Some(80));
        assert_eq!(access.background.attempts, 5);
        assert!(access.detached.attempts < access.background.attempts);
        assert_eq!(access.deployment.attempts, 1);
    }

    #[test]
    fn test_manual_restart_command() {
        let config = RunConfig::default();
        assert_eq!(
            config.manual_restart_command(),
            "kubectl rollout restart deployment/girus-backend -n girus"
        );
    }
}
