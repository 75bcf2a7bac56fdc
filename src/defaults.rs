//! Default values for labsync configuration.
//!
//! This module provides centralized default values used across the library
//! and the commands, ensuring consistency and avoiding duplication.

use std::path::PathBuf;
use std::time::Duration;

/// Branch used when a repository is added without one.
pub const DEFAULT_BRANCH: &str = "main";

/// Catalog manifest file name used when a repository is added without one.
pub const DEFAULT_MANIFEST_PATH: &str = "girus-labs.yaml";

/// Namespace the lab platform is deployed into.
pub const DEFAULT_NAMESPACE: &str = "girus";

/// Deployment (and service) name of the lab backend.
pub const BACKEND_NAME: &str = "girus-backend";

/// Deployment (and service) name of the lab frontend.
pub const FRONTEND_NAME: &str = "girus-frontend";

/// Label every lab definition ConfigMap carries.
pub const LAB_TEMPLATE_LABEL: (&str, &str) = ("app", "girus-lab-template");

/// Environment variable overriding the registry file location.
pub const REGISTRY_ENV: &str = "LABSYNC_REGISTRY";

/// Environment variable overriding where workspaces are created.
pub const WORKSPACE_ROOT_ENV: &str = "LABSYNC_WORKSPACE_ROOT";

/// Upper bound on waiting for the backend to finish a reload.
pub const RELOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Spacing between rollout status polls.
pub const RELOAD_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Pause after a confirmed reload before access is checked.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Budget for a single shallow clone.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Budget for a single control-plane call.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Budget for a single HTTP connectivity probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Returns the directory labsync keeps its per-user state in.
///
/// Resolves to `~/.labsync`, falling back to `.labsync` in the current
/// directory if the home directory cannot be determined.
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".labsync")
}

/// Returns the default registry file location.
///
/// This can be overridden by the `--registry` CLI flag or the
/// `LABSYNC_REGISTRY` environment variable.
pub fn default_registry_path() -> PathBuf {
    state_dir().join("registry.yaml")
}

/// Returns the directory fetched workspaces are created under.
pub fn default_workspace_root() -> PathBuf {
    std::env::var_os(WORKSPACE_ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}
