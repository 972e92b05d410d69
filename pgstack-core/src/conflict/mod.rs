//! Port conflict detection.
//!
//! Before a stack is provisioned its declared ports are checked against
//! what the host currently has bound. Reports are built fresh for every
//! check and never stored.

use crate::adapters::{ContainerRuntime, PortScanner};
use crate::error::Result;
use crate::state::StateTracker;
use crate::types::{BoundPort, RuntimeObservation, StackDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Who holds a conflicting port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortHolder {
    /// A stack from the catalog
    Stack(String),

    /// Something the catalog does not know about
    External,
}

impl std::fmt::Display for PortHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stack(id) => write!(f, "{}", id),
            Self::External => write!(f, "external"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingPort {
    pub port: u16,
    pub held_by: PortHolder,
}

/// Overlap between a target stack and what is already bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub requested_stack_id: String,

    /// Sorted by port; empty means no conflict
    pub conflicting_ports: Vec<ConflictingPort>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.conflicting_ports.is_empty()
    }

    /// Stacks holding at least one conflicting port, without duplicates.
    pub fn conflicting_stacks(&self) -> Vec<String> {
        let mut stacks: Vec<String> = Vec::new();
        for cp in &self.conflicting_ports {
            if let PortHolder::Stack(id) = &cp.held_by {
                if !stacks.contains(id) {
                    stacks.push(id.clone());
                }
            }
        }
        stacks
    }

    /// Whether any conflicting port is held outside the catalog.
    pub fn has_external(&self) -> bool {
        self.conflicting_ports.iter().any(|cp| cp.held_by == PortHolder::External)
    }

    /// `5432 (dev), 5433 (external)`
    pub fn summary(&self) -> String {
        self.conflicting_ports
            .iter()
            .map(|cp| format!("{} ({})", cp.port, cp.held_by))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "no conflicts for '{}'", self.requested_stack_id)
        } else {
            write!(f, "'{}' conflicts on {}", self.requested_stack_id, self.summary())
        }
    }
}

/// Checks a target stack's ports against the host.
#[derive(Clone)]
pub struct ConflictDetector {
    tracker: StateTracker,
    runtime: Arc<dyn ContainerRuntime>,
    scanner: Arc<dyn PortScanner>,
}

impl ConflictDetector {
    pub fn new(tracker: StateTracker, runtime: Arc<dyn ContainerRuntime>, scanner: Arc<dyn PortScanner>) -> Self {
        Self { tracker, runtime, scanner }
    }

    /// Report every declared port of `target` that something else holds.
    ///
    /// Ports held by `target` itself are never reported, so checking a stack
    /// that is already running yields an empty report.
    #[instrument(skip(self, target), fields(stack = %target.id))]
    pub async fn check(&self, target: &StackDefinition) -> Result<ConflictReport> {
        let observations = self.tracker.observe_all().await;
        let rivals = self.tracker.registry().overlapping(&target.id)?;
        let mut conflicts: BTreeMap<u16, PortHolder> = BTreeMap::new();

        match self.runtime.published_ports().await {
            Ok(bound) => {
                for binding in bound.iter().filter(|b| target.declares_port(b.port)) {
                    if let Some(holder) = self.attribute(binding, target, &observations, &rivals) {
                        record(&mut conflicts, binding.port, holder);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Runtime cannot list published ports, scanning host listeners");
                let target_live = observations.iter().any(|o| o.stack_id == target.id && o.state.is_live());
                for port in self.scanner.held_ports(&target.declared_ports).await {
                    match live_declarer(port, &observations, &rivals) {
                        Some(id) => record(&mut conflicts, port, PortHolder::Stack(id)),
                        // Assume the target's own containers hold it
                        None if target_live => debug!(port, "Port held, attributed to target"),
                        None => record(&mut conflicts, port, PortHolder::External),
                    }
                }
            }
        }

        let report = ConflictReport {
            requested_stack_id: target.id.clone(),
            conflicting_ports: conflicts.into_iter().map(|(port, held_by)| ConflictingPort { port, held_by }).collect(),
        };

        if report.is_empty() {
            debug!("No port conflicts");
        } else {
            info!(conflicts = %report.summary(), "Port conflicts detected");
        }
        Ok(report)
    }

    /// Owner of a runtime binding, or `None` when it belongs to the target.
    fn attribute(
        &self,
        binding: &BoundPort,
        target: &StackDefinition,
        observations: &[RuntimeObservation],
        rivals: &[&StackDefinition],
    ) -> Option<PortHolder> {
        let stacks = self.tracker.registry().all();

        if binding.project.as_deref() == Some(target.project.as_str()) {
            return None;
        }
        if let Some(container) = &binding.container {
            if observations.iter().any(|o| o.stack_id == target.id && o.owns_container(container)) {
                return None;
            }
            if let Some(owner) = observations.iter().find(|o| o.owns_container(container)) {
                return Some(PortHolder::Stack(owner.stack_id.clone()));
            }
        }
        if let Some(project) = &binding.project {
            if let Some(owner) = stacks.iter().find(|s| &s.project == project) {
                return Some(PortHolder::Stack(owner.id.clone()));
            }
        }

        match live_declarer(binding.port, observations, rivals) {
            Some(id) => Some(PortHolder::Stack(id)),
            None => Some(PortHolder::External),
        }
    }
}

/// A live stack among the target's rivals that declares `port`.
fn live_declarer(port: u16, observations: &[RuntimeObservation], rivals: &[&StackDefinition]) -> Option<String> {
    rivals
        .iter()
        .filter(|s| s.declares_port(port))
        .find(|s| observations.iter().any(|o| o.stack_id == s.id && o.state.is_live()))
        .map(|s| s.id.clone())
}

/// Keep the most specific holder seen for a port.
fn record(conflicts: &mut BTreeMap<u16, PortHolder>, port: u16, holder: PortHolder) {
    match conflicts.get(&port) {
        Some(PortHolder::Stack(_)) => {}
        _ => {
            conflicts.insert(port, holder);
        }
    }
}
