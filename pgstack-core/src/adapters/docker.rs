//! Docker Compose adapter.
//!
//! Drives the runtime through its CLI. Every call spawns a short-lived
//! process; output is parsed from the CLI's JSON formats.

use crate::adapters::{ContainerRuntime, ExecOutput, RuntimeInfo};
use crate::error::{Result, StackError};
use crate::types::{BoundPort, ContainerState, ContainerSummary, StackDefinition};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Stderr fragments that mean the daemon itself is unreachable.
const UNREACHABLE_MARKERS: &[&str] = &[
    "Cannot connect to the Docker daemon",
    "Is the docker daemon running",
    "error during connect",
    "connection refused",
];

/// Runtime adapter backed by `docker compose`.
#[derive(Debug, Clone)]
pub struct DockerCompose {
    binary: PathBuf,
}

impl DockerCompose {
    /// Create an adapter for the given CLI binary.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// `docker compose -f <bundle> -p <project>` prefix for a stack.
    fn compose(&self, stack: &StackDefinition) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("compose").arg("-f").arg(&stack.bundle).arg("-p").arg(&stack.project);
        if let Some(dir) = stack.bundle.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run a command to completion, mapping failures onto the error taxonomy.
    async fn run(&self, mut cmd: Command, stack_id: &str, action: &str) -> Result<Output> {
        let output = cmd.output().await.map_err(|e| StackError::RuntimeUnavailable {
            reason: format!("failed to execute {}: {}", self.binary.display(), e),
        })?;

        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_unreachable(&stderr) {
            return Err(StackError::RuntimeUnavailable { reason: stderr });
        }

        Err(StackError::Provisioning {
            stack_id: stack_id.to_string(),
            action: action.to_string(),
            diagnostic: if stderr.is_empty() { format!("exit status {}", output.status) } else { stderr },
        })
    }

    /// Run a read-only query; any failure means the runtime cannot be trusted.
    async fn query(&self, cmd: Command, what: &str) -> Result<String> {
        match self.run(cmd, "-", what).await {
            Ok(output) => Ok(String::from_utf8_lossy(&output.stdout).to_string()),
            Err(StackError::Provisioning { diagnostic, .. }) => {
                Err(StackError::RuntimeUnavailable { reason: format!("{} failed: {}", what, diagnostic) })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCompose {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["info", "--format", "{{json .ServerVersion}}"]).stdin(Stdio::null());
        let version = self.query(cmd, "runtime ping").await?;
        debug!(version = %version.trim(), "Runtime reachable");
        Ok(())
    }

    #[instrument(skip(self, stack), fields(stack = %stack.id))]
    async fn containers(&self, stack: &StackDefinition) -> Result<Vec<ContainerSummary>> {
        let mut cmd = self.compose(stack);
        cmd.args(["ps", "--all", "--format", "json"]);
        let stdout = self.query(cmd, "container listing").await?;
        parse_compose_ps(&stdout)
    }

    #[instrument(skip(self))]
    async fn published_ports(&self) -> Result<Vec<BoundPort>> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["ps", "--format", "{{json .}}"]).stdin(Stdio::null());
        let stdout = self.query(cmd, "port listing").await?;

        let mut bound = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let row: DockerPsRow = serde_json::from_str(line).map_err(|e| StackError::RuntimeUnavailable {
                reason: format!("unexpected `ps` output: {}", e),
            })?;
            let project = label_value(&row.labels, "com.docker.compose.project");
            for port in parse_port_bindings(&row.ports) {
                bound.push(BoundPort { port, container: Some(row.names.clone()), project: project.clone() });
            }
        }
        Ok(bound)
    }

    #[instrument(skip(self, stack), fields(stack = %stack.id))]
    async fn up(&self, stack: &StackDefinition, profiles: &[String]) -> Result<()> {
        let mut cmd = self.compose(stack);
        for profile in profiles {
            cmd.arg("--profile").arg(profile);
        }
        cmd.args(["up", "--detach"]);
        self.run(cmd, &stack.id, "start").await?;
        Ok(())
    }

    #[instrument(skip(self, stack), fields(stack = %stack.id))]
    async fn down(&self, stack: &StackDefinition, force: bool) -> Result<()> {
        let mut cmd = self.compose(stack);
        // Include every profile so gated services are torn down too
        for profile in &stack.optional_profiles {
            cmd.arg("--profile").arg(profile);
        }
        cmd.arg("down");
        if force {
            cmd.args(["--timeout", "0"]);
        }
        self.run(cmd, &stack.id, "stop").await?;
        Ok(())
    }

    #[instrument(skip(self, stack), fields(stack = %stack.id))]
    async fn purge_volumes(&self, stack: &StackDefinition) -> Result<()> {
        let mut cmd = self.compose(stack);
        for profile in &stack.optional_profiles {
            cmd.arg("--profile").arg(profile);
        }
        cmd.args(["down", "--volumes", "--remove-orphans"]);
        self.run(cmd, &stack.id, "purge volumes of").await?;
        Ok(())
    }

    #[instrument(skip(self, stack), fields(stack = %stack.id))]
    async fn exec(&self, stack: &StackDefinition, service: &str, command: &[String]) -> Result<ExecOutput> {
        let mut cmd = self.compose(stack);
        cmd.args(["exec", "-T", service]).args(command);
        let output = cmd.output().await.map_err(|e| StackError::RuntimeUnavailable {
            reason: format!("failed to execute {}: {}", self.binary.display(), e),
        })?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ExecOutput { exit_code: output.status.code().unwrap_or(-1), output: text.trim().to_string() })
    }

    #[instrument(skip(self, stack), fields(stack = %stack.id))]
    async fn logs(&self, stack: &StackDefinition, follow: bool, tail: Option<u32>) -> Result<()> {
        let mut cmd = self.compose(stack);
        cmd.arg("logs");
        if follow {
            cmd.arg("--follow");
        }
        if let Some(tail) = tail {
            cmd.arg("--tail").arg(tail.to_string());
        }
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());

        let status = cmd.status().await.map_err(|e| StackError::RuntimeUnavailable {
            reason: format!("failed to execute {}: {}", self.binary.display(), e),
        })?;
        if !status.success() {
            warn!(%status, "Log stream ended with an error");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn info(&self) -> Result<RuntimeInfo> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["info", "--format", "{{json .}}"]).stdin(Stdio::null());
        let stdout = self.query(cmd, "runtime info").await?;
        let info: DockerInfo = serde_json::from_str(stdout.trim()).map_err(|e| StackError::RuntimeUnavailable {
            reason: format!("unexpected `info` output: {}", e),
        })?;

        let mut volumes_cmd = Command::new(&self.binary);
        volumes_cmd.args(["volume", "ls", "--quiet"]).stdin(Stdio::null());
        let volumes = match self.query(volumes_cmd, "volume listing").await {
            Ok(out) => Some(out.lines().filter(|l| !l.trim().is_empty()).count() as u64),
            Err(e) => {
                debug!(error = %e, "Volume listing failed");
                None
            }
        };

        Ok(RuntimeInfo {
            containers: info.containers,
            containers_running: info.containers_running,
            containers_paused: info.containers_paused,
            containers_stopped: info.containers_stopped,
            images: info.images,
            volumes,
        })
    }

    fn name(&self) -> &str {
        "docker-compose"
    }
}

// ============================================================================
// Output parsing
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ComposePsRow {
    name: String,
    service: String,
    state: String,
    #[serde(default)]
    health: String,
    #[serde(default)]
    publishers: Option<Vec<ComposePublisher>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ComposePublisher {
    #[serde(default)]
    published_port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerPsRow {
    names: String,
    #[serde(default)]
    ports: String,
    #[serde(default)]
    labels: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerInfo {
    #[serde(default)]
    containers: u64,
    #[serde(default)]
    containers_running: u64,
    #[serde(default)]
    containers_paused: u64,
    #[serde(default)]
    containers_stopped: u64,
    #[serde(default)]
    images: u64,
}

/// Parse `docker compose ps --format json`.
///
/// Older Compose releases print one JSON array, newer ones one object per line.
fn parse_compose_ps(stdout: &str) -> Result<Vec<ContainerSummary>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<ComposePsRow> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
    } else {
        trimmed.lines().filter(|l| !l.trim().is_empty()).map(serde_json::from_str).collect()
    }
    .map_err(|e| StackError::RuntimeUnavailable { reason: format!("unexpected `compose ps` output: {}", e) })?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let mut published_ports: Vec<u16> = row
                .publishers
                .unwrap_or_default()
                .into_iter()
                .map(|p| p.published_port)
                .filter(|p| *p != 0)
                .collect();
            published_ports.sort_unstable();
            published_ports.dedup();

            ContainerSummary {
                name: row.name,
                service: row.service,
                state: ContainerState::parse(&row.state),
                health: Some(row.health).filter(|h| !h.is_empty()),
                published_ports,
            }
        })
        .collect())
}

/// Host ports in a `docker ps` port column.
///
/// `"0.0.0.0:5432->5432/tcp, :::5432->5432/tcp, 8080/tcp"` yields `[5432]`;
/// ranges (`0.0.0.0:5432-5434->5432-5434/tcp`) are expanded.
pub fn parse_port_bindings(ports: &str) -> Vec<u16> {
    let mut found = Vec::new();

    for binding in ports.split(',').map(str::trim) {
        // Unpublished container ports have no "->"
        let Some((host, _)) = binding.split_once("->") else {
            continue;
        };
        let Some((_, port)) = host.rsplit_once(':') else {
            continue;
        };
        match port.split_once('-') {
            Some((start, end)) => {
                if let (Ok(start), Ok(end)) = (start.parse::<u16>(), end.parse::<u16>()) {
                    found.extend(start..=end);
                }
            }
            None => {
                if let Ok(port) = port.parse::<u16>() {
                    found.push(port);
                }
            }
        }
    }

    found.sort_unstable();
    found.dedup();
    found
}

/// Value of `key` in a `docker ps` label column (`a=b,c=d`).
fn label_value(labels: &str, key: &str) -> Option<String> {
    labels.split(',').filter_map(|kv| kv.split_once('=')).find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
}

fn is_unreachable(stderr: &str) -> bool {
    UNREACHABLE_MARKERS.iter().any(|m| stderr.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_bindings() {
        assert_eq!(parse_port_bindings("0.0.0.0:5432->5432/tcp, :::5432->5432/tcp"), vec![5432]);
        assert_eq!(parse_port_bindings("8080/tcp"), Vec::<u16>::new());
        assert_eq!(parse_port_bindings("127.0.0.1:6432->6432/tcp, 5432/tcp"), vec![6432]);
        assert_eq!(parse_port_bindings("0.0.0.0:5432-5434->5432-5434/tcp"), vec![5432, 5433, 5434]);
        assert_eq!(parse_port_bindings(""), Vec::<u16>::new());
    }

    #[test]
    fn test_parse_compose_ps_lines() {
        let out = concat!(
            r#"{"Name":"pgstack-dev-postgres-1","Service":"postgres","State":"running","Health":"healthy","#,
            r#""Publishers":[{"URL":"0.0.0.0","TargetPort":5432,"PublishedPort":5432,"Protocol":"tcp"},"#,
            r#"{"URL":"::","TargetPort":5432,"PublishedPort":5432,"Protocol":"tcp"}]}"#,
            "\n",
            r#"{"Name":"pgstack-dev-pgbouncer-1","Service":"pgbouncer","State":"restarting","Health":"","#,
            r#""Publishers":null}"#,
        );
        let containers = parse_compose_ps(out).unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].published_ports, vec![5432]);
        assert_eq!(containers[0].health.as_deref(), Some("healthy"));
        assert!(containers[0].is_live());
        assert_eq!(containers[1].state, ContainerState::Restarting);
        assert!(containers[1].health.is_none());
    }

    #[test]
    fn test_parse_compose_ps_array() {
        let out = r#"[{"Name":"c1","Service":"coordinator","State":"exited","Publishers":[{"PublishedPort":0}]}]"#;
        let containers = parse_compose_ps(out).unwrap();
        assert_eq!(containers[0].state, ContainerState::Exited);
        assert!(containers[0].published_ports.is_empty());
        assert!(parse_compose_ps("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_compose_ps_garbage() {
        assert!(matches!(parse_compose_ps("not json"), Err(StackError::RuntimeUnavailable { .. })));
    }

    #[test]
    fn test_label_value() {
        let labels = "com.docker.compose.project=pgstack-dev,com.docker.compose.service=postgres";
        assert_eq!(label_value(labels, "com.docker.compose.project").as_deref(), Some("pgstack-dev"));
        assert_eq!(label_value(labels, "missing"), None);
    }

    #[test]
    fn test_unreachable_detection() {
        assert!(is_unreachable(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?"
        ));
        assert!(!is_unreachable("service \"postgres\" refers to undefined volume"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_runtime_unavailable() {
        let runtime = DockerCompose::new("/nonexistent/pgstack-test-docker");
        assert!(matches!(runtime.ping().await, Err(StackError::RuntimeUnavailable { .. })));
    }
}
