//! Single readiness probe attempts.

use crate::adapters::ContainerRuntime;
use crate::types::{ProbeKind, StackDefinition};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Issues one attempt of a probe. Attempts never error; a failure is a message.
#[derive(Clone)]
pub struct Prober {
    runtime: Arc<dyn ContainerRuntime>,
    http: reqwest::Client,
}

impl Prober {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime, http: reqwest::Client::new() }
    }

    /// One attempt, bounded by `timeout`.
    pub async fn attempt(
        &self,
        stack: &StackDefinition,
        service: &str,
        kind: &ProbeKind,
        timeout: Duration,
    ) -> std::result::Result<(), String> {
        match tokio::time::timeout(timeout, self.issue(stack, service, kind, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(format!("no answer within {}ms", timeout.as_millis())),
        }
    }

    async fn issue(
        &self,
        stack: &StackDefinition,
        service: &str,
        kind: &ProbeKind,
        timeout: Duration,
    ) -> std::result::Result<(), String> {
        match kind {
            ProbeKind::Http { url, expect_status } => {
                let response = self.http.get(url).timeout(timeout).send().await.map_err(|e| e.to_string())?;
                let status = response.status();
                let passed = match expect_status {
                    Some(expected) => status.as_u16() == *expected,
                    None => status.is_success(),
                };
                if passed {
                    Ok(())
                } else {
                    Err(format!("HTTP {}", status.as_u16()))
                }
            }
            ProbeKind::Tcp { host, port } => {
                TcpStream::connect((host.as_str(), *port)).await.map(|_| ()).map_err(|e| e.to_string())
            }
            ProbeKind::Exec { command } => {
                let output = self.runtime.exec(stack, service, command).await.map_err(|e| e.to_string())?;
                if output.success() {
                    Ok(())
                } else if output.output.is_empty() {
                    Err(format!("exit code {}", output.exit_code))
                } else {
                    Err(format!("exit code {}: {}", output.exit_code, output.output))
                }
            }
        }
    }
}
