//! # Control-Plane Client
//!
//! The synchronization core never talks to the cluster directly. It goes
//! through the [`ControlPlane`] trait, whose calls are synchronous and return
//! typed results. [`Kubectl`] implements the trait on top of the `kubectl`
//! binary; tests substitute an in-memory fake.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::process::{self, CommandOutput};

/// Observed state of a deployment rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutState {
    /// Every replica runs the latest revision.
    Complete,
    /// The rollout is still progressing; carries the latest status line.
    InProgress(String),
}

/// Readiness of the pods matching a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodReadiness {
    pub ready: bool,
    pub detail: String,
}

/// Operations the synchronization core needs from the cluster.
pub trait ControlPlane: Send + Sync {
    /// Fails with [`Error::ControlPlaneUnavailable`] if the cluster cannot be
    /// reached at all.
    fn ensure_reachable(&self) -> Result<()>;

    /// Applies the artifact at `artifact` with create-or-update semantics and
    /// returns the client's summary line.
    fn apply(&self, artifact: &Path) -> Result<String>;

    /// Requests a rolling restart of a deployment.
    fn restart_deployment(&self, namespace: &str, deployment: &str) -> Result<()>;

    /// Reports the rollout state, waiting at most `timeout` for it to finish.
    fn rollout_status(
        &self,
        namespace: &str,
        deployment: &str,
        timeout: Duration,
    ) -> Result<RolloutState>;

    /// Reports whether a running, ready pod matches `selector`.
    fn pod_readiness(&self, namespace: &str, selector: &str) -> Result<PodReadiness>;

    /// Returns the first port a service exposes, or `None` if the service
    /// does not exist.
    fn service_port(&self, namespace: &str, service: &str) -> Result<Option<u16>>;
}

/// `ControlPlane` backed by the `kubectl` binary.
pub struct Kubectl {
    timeout: Duration,
}

impl Kubectl {
    /// Creates a client whose calls each get `timeout` to finish.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn run(&self, operation: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let mut command = Command::new("kubectl");
        command.args(args);

        let output = match process::run(command, timeout) {
            Ok(output) => output,
            Err(Error::CommandSpawn { message, .. }) => {
                return Err(Error::ControlPlaneUnavailable {
                    message: format!("kubectl could not be started: {}", message),
                });
            }
            Err(e) => return Err(e),
        };

        if !output.success && is_connection_failure(output.diagnostic()) {
            return Err(Error::ControlPlaneUnavailable {
                message: output.diagnostic().to_string(),
            });
        }
        debug!("kubectl {} exited with {:?}", operation, output.code);
        Ok(output)
    }

    fn checked(&self, operation: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(operation, args, self.timeout)?;
        if output.success {
            Ok(output)
        } else {
            Err(Error::ControlPlane {
                operation: operation.to_string(),
                message: output.diagnostic().to_string(),
            })
        }
    }
}

impl ControlPlane for Kubectl {
    fn ensure_reachable(&self) -> Result<()> {
        let output = self.run("cluster-info", &["cluster-info"], self.timeout)?;
        if output.success {
            Ok(())
        } else {
            Err(Error::ControlPlaneUnavailable {
                message: output.diagnostic().to_string(),
            })
        }
    }

    fn apply(&self, artifact: &Path) -> Result<String> {
        let path = artifact.to_string_lossy();
        let output = self.checked("apply", &["apply", "-f", path.as_ref()])?;
        Ok(output.stdout.trim().to_string())
    }

    fn restart_deployment(&self, namespace: &str, deployment: &str) -> Result<()> {
        let target = format!("deployment/{}", deployment);
        self.checked(
            "rollout restart",
            &["rollout", "restart", &target, "-n", namespace],
        )?;
        Ok(())
    }

    fn rollout_status(
        &self,
        namespace: &str,
        deployment: &str,
        timeout: Duration,
    ) -> Result<RolloutState> {
        let target = format!("deployment/{}", deployment);
        let wait = format!("--timeout={}s", timeout.as_secs().max(1));
        let output = self.run(
            "rollout status",
            &["rollout", "status", &target, "-n", namespace, &wait],
            timeout + self.timeout,
        )?;
        Ok(parse_rollout_status(&output))
    }

    fn pod_readiness(&self, namespace: &str, selector: &str) -> Result<PodReadiness> {
        let output = self.checked(
            "get pods",
            &["get", "pods", "-n", namespace, "-l", selector, "-o", "json"],
        )?;
        parse_pod_readiness(selector, &output.stdout)
    }

    fn service_port(&self, namespace: &str, service: &str) -> Result<Option<u16>> {
        let output = self.run(
            "get service",
            &["get", "service", service, "-n", namespace, "-o", "json"],
            self.timeout,
        )?;
        if !output.success {
            if output.diagnostic().contains("NotFound") {
                return Ok(None);
            }
            return Err(Error::ControlPlane {
                operation: "get service".to_string(),
                message: output.diagnostic().to_string(),
            });
        }
        parse_service_port(&output.stdout)
    }
}

/// Whether `kubectl` output means the API server cannot be reached.
pub fn is_connection_failure(diagnostic: &str) -> bool {
    [
        "Unable to connect to the server",
        "The connection to the server",
        "connection refused",
        "no configuration has been provided",
        "dial tcp",
    ]
    .iter()
    .any(|needle| diagnostic.contains(needle))
}

fn parse_rollout_status(output: &CommandOutput) -> RolloutState {
    if output.success && output.stdout.contains("successfully rolled out") {
        return RolloutState::Complete;
    }
    let last_line = output
        .diagnostic()
        .lines()
        .last()
        .unwrap_or("waiting for rollout")
        .to_string();
    RolloutState::InProgress(last_line)
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    conditions: Vec<PodCondition>,
}

#[derive(Debug, Deserialize)]
struct PodCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl Pod {
    fn is_ready(&self) -> bool {
        self.status.phase == "Running"
            && self
                .status
                .conditions
                .iter()
                .any(|c| c.kind == "Ready" && c.status == "True")
    }
}

fn parse_pod_readiness(selector: &str, json: &str) -> Result<PodReadiness> {
    let pods: PodList = serde_json::from_str(json)?;

    if let Some(pod) = pods.items.iter().find(|pod| pod.is_ready()) {
        return Ok(PodReadiness {
            ready: true,
            detail: format!("pod {} is ready", pod.metadata.name),
        });
    }

    let detail = match pods.items.first() {
        None => format!("no pods match {}", selector),
        Some(pod) => format!(
            "pod {} is {}",
            pod.metadata.name,
            if pod.status.phase.is_empty() {
                "not ready"
            } else {
                pod.status.phase.as_str()
            }
        ),
    };
    Ok(PodReadiness {
        ready: false,
        detail,
    })
}

#[derive(Debug, Deserialize)]
struct Service {
    spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
struct ServicePort {
    port: u16,
}

fn parse_service_port(json: &str) -> Result<Option<u16>> {
    let service: Service = serde_json::from_str(json)?;
    Ok(service.spec.ports.first().map(|p| p.port))
}
