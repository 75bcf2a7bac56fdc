//! Shared test utilities for integration and E2E tests.
//!
//! Provides in-memory stand-ins for `git`, the control plane, and the local
//! access tooling, plus a fixture that wires them into a [`Synchronizer`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! let fixture = SyncFixture::new()
//!     .with_repo("https://example.test/labs.git", &[("catalog.yaml", CATALOG)]);
//! let report = fixture.synchronizer().sync_all().unwrap();
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_fs::TempDir;

use labsync::access::{
    AccessReconciler, ForwardLauncher, ForwardRequest, HttpProbe, Listener, PortInspector,
};
use labsync::cluster::{ControlPlane, PodReadiness, RolloutState};
use labsync::config::{AccessConfig, RetryBudget, RunConfig};
use labsync::error::{Error, Result};
use labsync::registry::{Registry, RepositoryDescriptor};
use labsync::repository::{GitOperations, SourceFetcher};
use labsync::sync::Synchronizer;
use labsync::workspace::WORKSPACE_PREFIX;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{lab_config_map, FakeAccess, FakeControlPlane, FakeGit, SyncFixture};
}

/// A lab definition ConfigMap as lab repositories ship them.
pub fn lab_config_map(id: &str, title: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {id}
  namespace: girus
  labels:
    app: girus-lab-template
data:
  lab.yaml: |
    name: {id}
    title: "{title}"
    duration: 30m
"#
    )
}

/// Serves repositories from memory; unknown urls fail like a missing branch.
#[derive(Clone, Default)]
pub struct FakeGit {
    repos: Arc<Mutex<HashMap<String, Vec<(String, String)>>>>,
    pub clones: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeGit {
    pub fn add_repo(&self, url: &str, files: &[(&str, &str)]) {
        self.repos.lock().unwrap().insert(
            url.to_string(),
            files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        );
    }
}

impl GitOperations for FakeGit {
    fn clone_branch(&self, url: &str, branch: &str, target_dir: &Path, _: Duration) -> Result<()> {
        self.clones
            .lock()
            .unwrap()
            .push((url.to_string(), branch.to_string()));
        let repos = self.repos.lock().unwrap();
        let files = repos.get(url).ok_or_else(|| Error::BranchNotFound {
            url: url.to_string(),
            branch: branch.to_string(),
        })?;
        for (rel, content) in files {
            let path = target_dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        Ok(())
    }
}

/// Records every control-plane call; everything succeeds.
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    /// Contents of every applied artifact, in order.
    pub applied: Arc<Mutex<Vec<String>>>,
    pub restarts: Arc<Mutex<Vec<String>>>,
}

impl ControlPlane for FakeControlPlane {
    fn ensure_reachable(&self) -> Result<()> {
        Ok(())
    }

    fn apply(&self, artifact: &Path) -> Result<String> {
        let content = fs::read_to_string(artifact)?;
        self.applied.lock().unwrap().push(content);
        Ok("configmap/lab configured".to_string())
    }

    fn restart_deployment(&self, _: &str, deployment: &str) -> Result<()> {
        self.restarts.lock().unwrap().push(deployment.to_string());
        Ok(())
    }

    fn rollout_status(&self, _: &str, _: &str, _: Duration) -> Result<RolloutState> {
        Ok(RolloutState::Complete)
    }

    fn pod_readiness(&self, _: &str, _: &str) -> Result<PodReadiness> {
        Ok(PodReadiness {
            ready: true,
            detail: "1/1 pods ready".to_string(),
        })
    }

    fn service_port(&self, _: &str, _: &str) -> Result<Option<u16>> {
        Ok(Some(80))
    }
}

/// Local ports with a healthy forwarder; launching a forward adds its port.
#[derive(Clone, Default)]
pub struct FakeAccess {
    pub forwarded: Arc<Mutex<HashSet<u16>>>,
    pub launches: Arc<Mutex<Vec<ForwardRequest>>>,
    pub evictions: Arc<Mutex<Vec<u32>>>,
}

impl FakeAccess {
    pub fn with_forwarded(ports: &[u16]) -> Self {
        let access = Self::default();
        access.forwarded.lock().unwrap().extend(ports);
        access
    }
}

impl PortInspector for FakeAccess {
    fn listener(&self, port: u16) -> Result<Option<Listener>> {
        Ok(self
            .forwarded
            .lock()
            .unwrap()
            .contains(&port)
            .then(|| Listener {
                pid: 4242,
                command: format!("kubectl port-forward svc/x {}:80", port),
            }))
    }
}

impl HttpProbe for FakeAccess {
    fn get(&self, url: &str, _: Duration) -> Result<u16> {
        let forwarded = self.forwarded.lock().unwrap();
        let up = forwarded
            .iter()
            .any(|port| url.contains(&format!(":{}/", port)));
        Ok(if up { 200 } else { 502 })
    }
}

impl ForwardLauncher for FakeAccess {
    fn stop_stale(&self, local_port: u16) -> Result<()> {
        self.forwarded.lock().unwrap().remove(&local_port);
        Ok(())
    }

    fn evict(&self, listener: &Listener) -> Result<()> {
        self.evictions.lock().unwrap().push(listener.pid);
        Ok(())
    }

    fn launch(&self, request: &ForwardRequest) -> Result<()> {
        self.launches.lock().unwrap().push(request.clone());
        self.forwarded.lock().unwrap().insert(request.local_port);
        Ok(())
    }
}

/// A registry, workspace root, and scratch directory in a temp dir, plus the
/// fakes a [`Synchronizer`] is built from.
pub struct SyncFixture {
    pub temp: TempDir,
    pub git: FakeGit,
    pub control_plane: FakeControlPlane,
    pub access: FakeAccess,
    pub skip_access: bool,
}

impl SyncFixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("workspaces")).unwrap();
        fs::create_dir_all(temp.path().join("scratch")).unwrap();
        Self {
            temp,
            git: FakeGit::default(),
            control_plane: FakeControlPlane::default(),
            access: FakeAccess::with_forwarded(&[8080, 8000]),
            skip_access: false,
        }
    }

    /// Serves `files` at `url` without registering it.
    pub fn serve_repo(self, url: &str, files: &[(&str, &str)]) -> Self {
        self.git.add_repo(url, files);
        self
    }

    /// Serves `files` at the descriptor's url and registers the descriptor.
    pub fn with_repo(self, descriptor: RepositoryDescriptor, files: &[(&str, &str)]) -> Self {
        self.git.add_repo(&descriptor.url, files);
        self.registry().upsert(descriptor).unwrap();
        self
    }

    /// Registers a repository nothing serves.
    pub fn with_unreachable_repo(self, url: &str) -> Self {
        self.registry()
            .upsert(RepositoryDescriptor::new(url))
            .unwrap();
        self
    }

    pub fn with_access(mut self, access: FakeAccess) -> Self {
        self.access = access;
        self
    }

    pub fn skipping_access(mut self) -> Self {
        self.skip_access = true;
        self
    }

    pub fn registry(&self) -> Registry {
        Registry::new(self.temp.path().join("registry.yaml"))
    }

    pub fn workspace_root(&self) -> std::path::PathBuf {
        self.temp.path().join("workspaces")
    }

    pub fn config(&self) -> RunConfig {
        RunConfig::default()
            .with_progress(false)
            .with_skip_access(self.skip_access)
            .with_reload_timeout(Duration::from_secs(2))
            .with_reload_poll_interval(Duration::from_millis(10))
            .with_settle_delay(Duration::ZERO)
            .with_scratch_dir(self.temp.path().join("scratch"))
            .with_access(AccessConfig {
                background: RetryBudget::immediate(2),
                detached: RetryBudget::immediate(1),
                deployment: RetryBudget::immediate(1),
                state_dir: self.temp.path().join("state"),
                ..AccessConfig::default()
            })
    }

    pub fn synchronizer(&self) -> Synchronizer {
        let config = self.config();
        let control_plane: Arc<dyn ControlPlane> = Arc::new(self.control_plane.clone());
        let fetcher = SourceFetcher::with_operations(
            Box::new(self.git.clone()),
            self.workspace_root(),
            Duration::from_secs(5),
        );
        let access = AccessReconciler::with_operations(
            control_plane.clone(),
            Box::new(self.access.clone()),
            Box::new(self.access.clone()),
            Box::new(self.access.clone()),
            &config,
        );
        Synchronizer::with_components(self.registry(), fetcher, control_plane, access, config)
    }

    /// Workspaces still present under the workspace root.
    pub fn leftover_workspaces(&self) -> Vec<String> {
        fs::read_dir(self.workspace_root())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(WORKSPACE_PREFIX))
            .collect()
    }
}
