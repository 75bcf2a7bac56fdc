//! # Access Reconciler
//!
//! After the backend restarts, the local port forwards that expose the lab
//! platform usually die with the pods they pointed at. The reconciler checks
//! each configured access path independently and classifies it as healthy or
//! as needing repair:
//!
//! - **absent**: nothing listens on the local port,
//! - **foreign owner**: something listens that is not a `kubectl port-forward`,
//! - **unresponsive**: the forward exists but the health probe fails.
//!
//! Broken paths are repaired by trying an ordered list of
//! [`ForwardStrategy`] values. Before each launch, old forwards on the port
//! are stopped and any other process holding it is killed. Every strategy
//! follows the same contract: launch, probe within its retry budget, then
//! accept or hand over to the next strategy. A probe only counts when a
//! forwarder owns the port. The default list is a background service forward, a
//! detached service forward, and a last-resort forward to the deployment.
//!
//! Failing every strategy is a soft failure: the report carries the manual
//! commands and the run continues.

use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::cluster::ControlPlane;
use crate::config::{AccessConfig, AccessTarget, RetryBudget, RunConfig};
use crate::error::{Error, Result};
use crate::process;

/// A process listening on a local port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub pid: u32,
    pub command: String,
}

impl Listener {
    /// Whether the listener is a kubectl port forward.
    pub fn is_forwarder(&self) -> bool {
        self.command.contains("kubectl") && self.command.contains("port-forward")
    }
}

/// Finds which process listens on a local port.
pub trait PortInspector: Send + Sync {
    fn listener(&self, port: u16) -> Result<Option<Listener>>;
}

/// Issues HTTP GET probes.
pub trait HttpProbe: Send + Sync {
    /// Returns the response status code. Redirects are not followed.
    fn get(&self, url: &str, timeout: Duration) -> Result<u16>;
}

/// How a forwarding process is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Child of the current process.
    Background,
    /// In its own process group, with its pid recorded on disk.
    Detached,
}

/// Everything needed to start one forwarding process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Access path name, used for the pid and log files.
    pub target: String,
    pub namespace: String,
    /// `svc/<name>` or `deployment/<name>`.
    pub resource: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub bind_address: String,
    pub mode: LaunchMode,
}

impl ForwardRequest {
    /// Arguments passed to `kubectl`.
    pub fn kubectl_args(&self) -> Vec<String> {
        vec![
            "port-forward".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
            self.resource.clone(),
            format!("{}:{}", self.local_port, self.remote_port),
            "--address".to_string(),
            self.bind_address.clone(),
        ]
    }

    /// The command line an operator can run by hand.
    pub fn manual_command(&self) -> String {
        format!("kubectl {}", self.kubectl_args().join(" "))
    }
}

/// Starts and stops forwarding processes.
pub trait ForwardLauncher: Send + Sync {
    /// Terminates forwarding processes bound to `local_port`.
    fn stop_stale(&self, local_port: u16) -> Result<()>;

    /// Terminates a process that is not a forward but holds a needed port.
    fn evict(&self, listener: &Listener) -> Result<()>;

    /// Starts a forwarding process and returns without waiting for it.
    fn launch(&self, request: &ForwardRequest) -> Result<()>;
}

/// One way of re-establishing a forward.
pub trait ForwardStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// How long and how often to probe after launching.
    fn budget(&self) -> RetryBudget;

    /// The forward to launch for `target`, whose service port is `remote_port`.
    fn request(&self, target: &AccessTarget, remote_port: u16, config: &AccessConfig)
        -> ForwardRequest;
}

/// Resource a [`LaunchStrategy`] forwards to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardResource {
    Service,
    Deployment,
}

/// A strategy defined by a resource kind, a launch mode, and a budget.
#[derive(Debug, Clone)]
pub struct LaunchStrategy {
    name: String,
    resource: ForwardResource,
    mode: LaunchMode,
    budget: RetryBudget,
    namespace: String,
}

impl LaunchStrategy {
    pub fn background_service(namespace: &str, budget: RetryBudget) -> Self {
        Self {
            name: "background service forward".to_string(),
            resource: ForwardResource::Service,
            mode: LaunchMode::Background,
            budget,
            namespace: namespace.to_string(),
        }
    }

    pub fn detached_service(namespace: &str, budget: RetryBudget) -> Self {
        Self {
            name: "detached service forward".to_string(),
            resource: ForwardResource::Service,
            mode: LaunchMode::Detached,
            budget,
            namespace: namespace.to_string(),
        }
    }

    pub fn deployment(namespace: &str, budget: RetryBudget) -> Self {
        Self {
            name: "deployment forward".to_string(),
            resource: ForwardResource::Deployment,
            mode: LaunchMode::Detached,
            budget,
            namespace: namespace.to_string(),
        }
    }
}

impl ForwardStrategy for LaunchStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn budget(&self) -> RetryBudget {
        self.budget
    }

    fn request(
        &self,
        target: &AccessTarget,
        remote_port: u16,
        config: &AccessConfig,
    ) -> ForwardRequest {
        let resource = match self.resource {
            ForwardResource::Service => format!("svc/{}", target.service),
            ForwardResource::Deployment => format!("deployment/{}", target.deployment),
        };
        ForwardRequest {
            target: target.name.clone(),
            namespace: self.namespace.clone(),
            resource,
            local_port: target.local_port,
            remote_port,
            bind_address: config.bind_address.clone(),
            mode: self.mode,
        }
    }
}

/// The default strategy list, in the order they are tried.
pub fn default_strategies(namespace: &str, config: &AccessConfig) -> Vec<Box<dyn ForwardStrategy>> {
    vec![
        Box::new(LaunchStrategy::background_service(namespace, config.background)),
        Box::new(LaunchStrategy::detached_service(namespace, config.detached)),
        Box::new(LaunchStrategy::deployment(namespace, config.deployment)),
    ]
}

/// Observed state of one access path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathState {
    Healthy,
    Absent,
    ForeignOwner(Listener),
    Unresponsive(String),
}

impl PathState {
    pub fn needs_reconciliation(&self) -> bool {
        !matches!(self, PathState::Healthy)
    }
}

/// What the reconciler did about one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathOutcome {
    AlreadyHealthy,
    Restored { strategy: String },
    Failed { reason: String, manual: Vec<String> },
}

/// Per-path result of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathReport {
    pub target: String,
    pub initial: PathState,
    pub outcome: PathOutcome,
}

/// Result of [`AccessReconciler::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub paths: Vec<PathReport>,
}

impl ReconcileReport {
    /// Whether every path is reachable.
    pub fn is_success(&self) -> bool {
        self.paths
            .iter()
            .all(|p| !matches!(p.outcome, PathOutcome::Failed { .. }))
    }

    /// Manual commands for every path that could not be restored.
    pub fn manual_steps(&self) -> Vec<String> {
        self.paths
            .iter()
            .filter_map(|p| match &p.outcome {
                PathOutcome::Failed { manual, .. } => Some(manual.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// Whether a probe status means the path answers.
pub fn is_success_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Checks and repairs local access to cluster services.
pub struct AccessReconciler {
    control_plane: Arc<dyn ControlPlane>,
    inspector: Box<dyn PortInspector>,
    probe: Box<dyn HttpProbe>,
    launcher: Box<dyn ForwardLauncher>,
    strategies: Vec<Box<dyn ForwardStrategy>>,
    config: AccessConfig,
    namespace: String,
    probe_timeout: Duration,
}

impl AccessReconciler {
    /// Creates a reconciler using `lsof`, `reqwest`, and `kubectl`.
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: &RunConfig) -> Self {
        Self::with_operations(
            control_plane,
            Box::new(LsofInspector::new(config.command_timeout)),
            Box::new(ReqwestProbe),
            Box::new(KubectlForwarder::new(
                config.access.state_dir.clone(),
                config.command_timeout,
            )),
            config,
        )
    }

    /// Creates a reconciler with custom operations and the default strategies.
    pub fn with_operations(
        control_plane: Arc<dyn ControlPlane>,
        inspector: Box<dyn PortInspector>,
        probe: Box<dyn HttpProbe>,
        launcher: Box<dyn ForwardLauncher>,
        config: &RunConfig,
    ) -> Self {
        Self {
            control_plane,
            inspector,
            probe,
            launcher,
            strategies: default_strategies(&config.namespace, &config.access),
            config: config.access.clone(),
            namespace: config.namespace.clone(),
            probe_timeout: config.probe_timeout,
        }
    }

    /// Replaces the strategy list.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ForwardStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Checks every configured path and repairs the broken ones.
    pub fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for target in &self.config.targets {
            let initial = self.classify(target);
            let outcome = if initial.needs_reconciliation() {
                info!("{} access needs repair: {:?}", target.name, initial);
                self.restore(target)
            } else {
                debug!("{} access is healthy", target.name);
                PathOutcome::AlreadyHealthy
            };
            report.paths.push(PathReport {
                target: target.name.clone(),
                initial,
                outcome,
            });
        }
        report
    }

    /// Classifies one access path.
    pub fn classify(&self, target: &AccessTarget) -> PathState {
        match self.inspector.listener(target.local_port) {
            Ok(None) => return PathState::Absent,
            Ok(Some(listener)) if !listener.is_forwarder() => {
                return PathState::ForeignOwner(listener)
            }
            Ok(Some(_)) => {}
            Err(e) => debug!(
                "could not inspect port {}, relying on probe: {}",
                target.local_port, e
            ),
        }

        match self.probe_once(target) {
            Ok(()) => PathState::Healthy,
            Err(reason) => PathState::Unresponsive(reason),
        }
    }

    fn probe_url(&self, target: &AccessTarget) -> String {
        format!(
            "http://{}:{}{}",
            self.config.probe_host, target.local_port, target.health_path
        )
    }

    fn probe_once(&self, target: &AccessTarget) -> std::result::Result<(), String> {
        match self.probe.get(&self.probe_url(target), self.probe_timeout) {
            Ok(status) if is_success_status(status) => Ok(()),
            Ok(status) => Err(format!("health check returned {}", status)),
            Err(e) => Err(e.to_string()),
        }
    }

    fn resolve_remote_port(&self, target: &AccessTarget) -> Result<u16> {
        if let Some(port) = target.remote_port {
            return Ok(port);
        }
        self.control_plane
            .service_port(&self.namespace, &target.service)?
            .ok_or_else(|| Error::Forward {
                target: target.name.clone(),
                message: format!("service {} exposes no port", target.service),
            })
    }

    fn restore(&self, target: &AccessTarget) -> PathOutcome {
        let remote_port = match self.resolve_remote_port(target) {
            Ok(port) => port,
            Err(e) => {
                warn!("cannot forward {}: {}", target.name, e);
                return PathOutcome::Failed {
                    reason: e.to_string(),
                    manual: self.manual_commands(target, target.local_port),
                };
            }
        };

        let mut last_reason = String::from("no forwarding strategy configured");
        for strategy in &self.strategies {
            self.clear_port(target);
            let request = strategy.request(target, remote_port, &self.config);
            match self.attempt(strategy.as_ref(), target, &request) {
                Ok(()) => {
                    info!("{} access restored by {}", target.name, strategy.name());
                    return PathOutcome::Restored {
                        strategy: strategy.name().to_string(),
                    };
                }
                Err(reason) => {
                    warn!("{} failed for {}: {}", strategy.name(), target.name, reason);
                    last_reason = reason;
                }
            }
        }

        // The last strategy's forward is detached and would outlive the run.
        self.stop_forwards(target);
        PathOutcome::Failed {
            reason: last_reason,
            manual: self.manual_commands(target, remote_port),
        }
    }

    /// Launch, then probe within the strategy's budget.
    fn attempt(
        &self,
        strategy: &dyn ForwardStrategy,
        target: &AccessTarget,
        request: &ForwardRequest,
    ) -> std::result::Result<(), String> {
        self.launcher.launch(request).map_err(|e| e.to_string())?;

        let budget = strategy.budget();
        thread::sleep(budget.initial_delay);

        let attempts = budget.attempts.max(1);
        let mut reason = String::new();
        for attempt in 1..=attempts {
            match self
                .probe_once(target)
                .and_then(|()| self.verify_owner(target))
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(
                        "{} probe {}/{} for {}: {}",
                        strategy.name(),
                        attempt,
                        attempts,
                        target.name,
                        e
                    );
                    reason = e;
                }
            }
            if attempt < attempts {
                thread::sleep(budget.spacing);
            }
        }
        Err(reason)
    }

    /// Whether the process answering on the port is a forwarder.
    fn verify_owner(&self, target: &AccessTarget) -> std::result::Result<(), String> {
        match self.inspector.listener(target.local_port) {
            Ok(Some(listener)) if listener.is_forwarder() => Ok(()),
            Ok(Some(listener)) => Err(format!(
                "port {} is held by {} (pid {})",
                target.local_port, listener.command, listener.pid
            )),
            Ok(None) => Err(format!("nothing listens on port {}", target.local_port)),
            Err(e) => {
                debug!(
                    "could not inspect port {}, trusting probe: {}",
                    target.local_port, e
                );
                Ok(())
            }
        }
    }

    fn stop_forwards(&self, target: &AccessTarget) {
        if let Err(e) = self.launcher.stop_stale(target.local_port) {
            warn!("could not stop old forwards on port {}: {}", target.local_port, e);
        }
    }

    /// Stops old forwards on the port, then evicts whatever else holds it.
    fn clear_port(&self, target: &AccessTarget) {
        self.stop_forwards(target);
        match self.inspector.listener(target.local_port) {
            Ok(Some(listener)) if !listener.is_forwarder() => {
                info!(
                    "port {} is held by {} (pid {}), stopping it",
                    target.local_port, listener.command, listener.pid
                );
                if let Err(e) = self.launcher.evict(&listener) {
                    warn!("could not free port {}: {}", target.local_port, e);
                }
            }
            Ok(_) => {}
            Err(e) => debug!("could not inspect port {}: {}", target.local_port, e),
        }
    }

    fn manual_commands(&self, target: &AccessTarget, remote_port: u16) -> Vec<String> {
        let request = LaunchStrategy::background_service(&self.namespace, RetryBudget::immediate(1))
            .request(target, remote_port, &self.config);
        vec![request.manual_command()]
    }
}

/// `PortInspector` backed by `lsof` and `ps`.
pub struct LsofInspector {
    timeout: Duration,
}

impl LsofInspector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl PortInspector for LsofInspector {
    fn listener(&self, port: u16) -> Result<Option<Listener>> {
        let mut lsof = Command::new("lsof");
        lsof.args(["-nP", &format!("-iTCP:{}", port), "-sTCP:LISTEN", "-t"]);
        let output = process::run(lsof, self.timeout)?;

        // lsof exits 1 with no output when nothing matches.
        let Some(pid) = output
            .stdout
            .lines()
            .find_map(|line| line.trim().parse::<u32>().ok())
        else {
            return Ok(None);
        };

        let mut ps = Command::new("ps");
        ps.args(["-p", &pid.to_string(), "-o", "args="]);
        let command = process::run(ps, self.timeout)?.stdout.trim().to_string();

        Ok(Some(Listener { pid, command }))
    }
}

/// `HttpProbe` backed by a blocking `reqwest` client.
pub struct ReqwestProbe;

impl HttpProbe for ReqwestProbe {
    fn get(&self, url: &str, timeout: Duration) -> Result<u16> {
        let probe_error = |e: reqwest::Error| Error::Probe {
            url: url.to_string(),
            message: e.to_string(),
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(probe_error)?;
        let response = client.get(url).send().map_err(probe_error)?;
        Ok(response.status().as_u16())
    }
}

/// Forwarding processes started by this run, keyed by local port.
#[derive(Default)]
struct ForwardChildren {
    children: Mutex<Vec<(u16, Child)>>,
}

impl ForwardChildren {
    fn lock(&self) -> MutexGuard<'_, Vec<(u16, Child)>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, port: u16, child: Child) {
        self.lock().push((port, child));
    }

    /// Drops children that have exited, collecting their status.
    fn reap(&self) {
        self.lock()
            .retain_mut(|(_, child)| matches!(child.try_wait(), Ok(None)));
    }

    /// Kills and waits for the children bound to `port`.
    fn stop(&self, port: u16) {
        self.lock().retain_mut(|(bound, child)| {
            if *bound != port {
                return true;
            }
            // Fails only when the child already exited.
            let _ = child.kill();
            if let Err(e) = child.wait() {
                debug!("could not wait for forward pid {}: {}", child.id(), e);
            }
            false
        });
        self.reap();
    }

    #[cfg(test)]
    fn ports(&self) -> Vec<u16> {
        self.lock().iter().map(|(port, _)| *port).collect()
    }
}

/// `ForwardLauncher` backed by `kubectl port-forward`, `pkill`, and `kill`.
pub struct KubectlForwarder {
    state_dir: PathBuf,
    timeout: Duration,
    children: ForwardChildren,
}

impl KubectlForwarder {
    pub fn new(state_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            state_dir,
            timeout,
            children: ForwardChildren::default(),
        }
    }

    /// Where the detached forwarder for `target` records its pid.
    pub fn pid_file(&self, target: &str) -> PathBuf {
        self.state_dir.join(format!("{}.pid", target))
    }

    fn spawn_error(request: &ForwardRequest, e: std::io::Error) -> Error {
        Error::Forward {
            target: request.target.clone(),
            message: e.to_string(),
        }
    }
}

impl ForwardLauncher for KubectlForwarder {
    fn stop_stale(&self, local_port: u16) -> Result<()> {
        let mut pkill = Command::new("pkill");
        pkill.args(["-f", &format!("kubectl port-forward.* {}:", local_port)]);
        self.children.stop(local_port);
        let output = process::run(pkill, self.timeout)?;
        // pkill exits 1 when no process matched.
        match output.code {
            Some(0) | Some(1) => Ok(()),
            _ => Err(Error::Forward {
                target: format!("port {}", local_port),
                message: output.diagnostic().to_string(),
            }),
        }
    }

    fn evict(&self, listener: &Listener) -> Result<()> {
        let mut kill = Command::new("kill");
        kill.arg(listener.pid.to_string());
        let output = process::run(kill, self.timeout)?;
        if output.success {
            Ok(())
        } else {
            Err(Error::Forward {
                target: format!("pid {}", listener.pid),
                message: output.diagnostic().to_string(),
            })
        }
    }

    fn launch(&self, request: &ForwardRequest) -> Result<()> {
        let mut command = Command::new("kubectl");
        command.args(request.kubectl_args()).stdin(Stdio::null());

        match request.mode {
            LaunchMode::Background => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
                let child = command
                    .spawn()
                    .map_err(|e| Self::spawn_error(request, e))?;
                debug!("started {} (pid {})", request.manual_command(), child.id());
                self.children.track(request.local_port, child);
            }
            LaunchMode::Detached => {
                fs::create_dir_all(&self.state_dir)?;
                let log = fs::File::create(
                    self.state_dir.join(format!("{}-forward.log", request.target)),
                )?;
                command.stdout(log.try_clone()?).stderr(log);
                #[cfg(unix)]
                {
                    use std::os::unix::process::CommandExt;
                    command.process_group(0);
                }
                let child = command
                    .spawn()
                    .map_err(|e| Self::spawn_error(request, e))?;
                fs::write(self.pid_file(&request.target), child.id().to_string())?;
                debug!(
                    "started detached {} (pid {})",
                    request.manual_command(),
                    child.id()
                );
                self.children.track(request.local_port, child);
            }
        }
        Ok(())
    }
}
