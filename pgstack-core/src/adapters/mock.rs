//! In-memory container runtime.
//!
//! Simulates compose projects well enough to drive the lifecycle without a
//! daemon. Used by unit and integration tests.

use crate::adapters::{ContainerRuntime, ExecOutput, RuntimeInfo};
use crate::error::{Result, StackError};
use crate::types::{BoundPort, ContainerState, ContainerSummary, StackDefinition};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A mutating call recorded by [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Up { stack: String, profiles: Vec<String> },
    Down { stack: String, force: bool },
    PurgeVolumes { stack: String },
    Exec { stack: String, service: String },
    Logs { stack: String, follow: bool },
}

#[derive(Debug, Default)]
struct MockState {
    /// Containers per compose project
    projects: BTreeMap<String, Vec<ContainerSummary>>,

    /// Projects with volumes on disk
    volumes: BTreeSet<String>,

    /// Ports held outside any project
    external_ports: BTreeSet<u16>,

    /// Services that never become live after `up`
    stuck_services: HashSet<String>,

    /// Exit codes returned by `exec`, per service
    exec_exit_codes: HashMap<String, i32>,

    unavailable: bool,
    fail_up: Option<String>,
    fail_down: Option<String>,
    ports_unsupported: bool,

    calls: Vec<RuntimeCall>,
}

/// Mock runtime for testing.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark the stack's required services as running, as if started earlier.
    pub fn seed_running(&self, stack: &StackDefinition) {
        let containers = stack
            .services
            .iter()
            .filter(|s| s.profiles.is_empty())
            .map(|s| container(stack, &s.name, ContainerState::Running, &s.published_ports))
            .collect();
        let mut state = self.lock();
        state.projects.insert(stack.project.clone(), containers);
        state.volumes.insert(stack.project.clone());
    }

    /// Put one service of a stack into `state`, creating the project when needed.
    pub fn set_service_state(&self, stack: &StackDefinition, service: &str, container_state: ContainerState) {
        let ports = stack
            .services
            .iter()
            .find(|s| s.name == service)
            .map(|s| s.published_ports.clone())
            .unwrap_or_default();

        let mut state = self.lock();
        let containers = state.projects.entry(stack.project.clone()).or_default();
        match containers.iter_mut().find(|c| c.service == service) {
            Some(c) => c.state = container_state,
            None => containers.push(container(stack, service, container_state, &ports)),
        }
    }

    /// Hold a port outside every compose project.
    pub fn bind_external_port(&self, port: u16) {
        self.lock().external_ports.insert(port);
    }

    /// Make every call fail as if the daemon were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make `up` fail with the given diagnostic.
    pub fn fail_up(&self, diagnostic: &str) {
        self.lock().fail_up = Some(diagnostic.to_string());
    }

    /// Make `down` fail with the given diagnostic.
    pub fn fail_down(&self, diagnostic: &str) {
        self.lock().fail_down = Some(diagnostic.to_string());
    }

    /// Make `published_ports` unsupported so callers fall back to scanning.
    pub fn set_ports_unsupported(&self, unsupported: bool) {
        self.lock().ports_unsupported = unsupported;
    }

    /// Leave `service` restarting after every `up`.
    pub fn keep_service_down(&self, service: &str) {
        self.lock().stuck_services.insert(service.to_string());
    }

    /// Exit code returned when executing in `service` (0 when unset).
    pub fn set_exec_exit_code(&self, service: &str, exit_code: i32) {
        self.lock().exec_exit_codes.insert(service.to_string(), exit_code);
    }

    /// Whether the project still has volumes.
    pub fn has_volumes(&self, stack: &StackDefinition) -> bool {
        self.lock().volumes.contains(&stack.project)
    }

    /// Mutating calls made so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    fn check_available(state: &MockState) -> Result<()> {
        if state.unavailable {
            return Err(StackError::RuntimeUnavailable { reason: "mock runtime is down".to_string() });
        }
        Ok(())
    }
}

fn container(stack: &StackDefinition, service: &str, state: ContainerState, ports: &[u16]) -> ContainerSummary {
    ContainerSummary {
        name: format!("{}-{}-1", stack.project, service),
        service: service.to_string(),
        state,
        health: None,
        published_ports: ports.to_vec(),
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<()> {
        Self::check_available(&self.lock())
    }

    async fn containers(&self, stack: &StackDefinition) -> Result<Vec<ContainerSummary>> {
        let state = self.lock();
        Self::check_available(&state)?;
        Ok(state.projects.get(&stack.project).cloned().unwrap_or_default())
    }

    async fn published_ports(&self) -> Result<Vec<BoundPort>> {
        let state = self.lock();
        Self::check_available(&state)?;
        if state.ports_unsupported {
            return Err(StackError::RuntimeUnavailable { reason: "port listing not supported".to_string() });
        }

        let mut bound = Vec::new();
        for (project, containers) in &state.projects {
            for c in containers.iter().filter(|c| c.is_live()) {
                for port in &c.published_ports {
                    bound.push(BoundPort {
                        port: *port,
                        container: Some(c.name.clone()),
                        project: Some(project.clone()),
                    });
                }
            }
        }
        for port in &state.external_ports {
            bound.push(BoundPort { port: *port, container: None, project: None });
        }
        Ok(bound)
    }

    async fn up(&self, stack: &StackDefinition, profiles: &[String]) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(RuntimeCall::Up { stack: stack.id.clone(), profiles: profiles.to_vec() });

        if let Some(diagnostic) = state.fail_up.clone() {
            return Err(StackError::Provisioning {
                stack_id: stack.id.clone(),
                action: "start".to_string(),
                diagnostic,
            });
        }

        let containers: Vec<ContainerSummary> = stack
            .services
            .iter()
            .filter(|s| s.profiles.is_empty() || s.profiles.iter().any(|p| profiles.contains(p)))
            .map(|s| {
                let container_state = if state.stuck_services.contains(&s.name) {
                    ContainerState::Restarting
                } else {
                    ContainerState::Running
                };
                container(stack, &s.name, container_state, &s.published_ports)
            })
            .collect();

        debug!(project = %stack.project, count = containers.len(), "Mock stack up");
        state.projects.insert(stack.project.clone(), containers);
        state.volumes.insert(stack.project.clone());
        Ok(())
    }

    async fn down(&self, stack: &StackDefinition, force: bool) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(RuntimeCall::Down { stack: stack.id.clone(), force });

        if let Some(diagnostic) = state.fail_down.clone() {
            return Err(StackError::Provisioning {
                stack_id: stack.id.clone(),
                action: "stop".to_string(),
                diagnostic,
            });
        }

        state.projects.remove(&stack.project);
        Ok(())
    }

    async fn purge_volumes(&self, stack: &StackDefinition) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(RuntimeCall::PurgeVolumes { stack: stack.id.clone() });
        state.projects.remove(&stack.project);
        state.volumes.remove(&stack.project);
        Ok(())
    }

    async fn exec(&self, stack: &StackDefinition, service: &str, _command: &[String]) -> Result<ExecOutput> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(RuntimeCall::Exec { stack: stack.id.clone(), service: service.to_string() });

        let live = state
            .projects
            .get(&stack.project)
            .is_some_and(|cs| cs.iter().any(|c| c.service == service && c.is_live()));
        if !live {
            return Ok(ExecOutput { exit_code: 1, output: format!("service \"{}\" is not running", service) });
        }

        let exit_code = state.exec_exit_codes.get(service).copied().unwrap_or(0);
        Ok(ExecOutput { exit_code, output: String::new() })
    }

    async fn logs(&self, stack: &StackDefinition, follow: bool, _tail: Option<u32>) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(RuntimeCall::Logs { stack: stack.id.clone(), follow });
        Ok(())
    }

    async fn info(&self) -> Result<RuntimeInfo> {
        let state = self.lock();
        Self::check_available(&state)?;
        let all: Vec<&ContainerSummary> = state.projects.values().flatten().collect();
        let running = all.iter().filter(|c| c.is_live()).count() as u64;
        let paused = all.iter().filter(|c| c.state == ContainerState::Paused).count() as u64;
        Ok(RuntimeInfo {
            containers: all.len() as u64,
            containers_running: running,
            containers_paused: paused,
            containers_stopped: all.len() as u64 - running - paused,
            images: state.projects.len() as u64,
            volumes: Some(state.volumes.len() as u64),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
