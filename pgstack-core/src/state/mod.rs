//! Runtime state reconciliation.
//!
//! The tracker derives each stack's state from the container runtime on every
//! call. Nothing is cached or persisted: there is no record of "the active
//! stack" anywhere, so several stacks may show up live at once and are
//! reported as such.

use crate::adapters::ContainerRuntime;
use crate::error::Result;
use crate::registry::StackRegistry;
use crate::types::{BoundPort, ContainerSummary, ObservedState, RuntimeObservation, StackDefinition};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Derives [`RuntimeObservation`]s from the runtime.
#[derive(Clone)]
pub struct StateTracker {
    registry: Arc<StackRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl StateTracker {
    pub fn new(registry: Arc<StackRegistry>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { registry, runtime }
    }

    pub fn registry(&self) -> &StackRegistry {
        &self.registry
    }

    /// Observe one stack by id.
    ///
    /// Runtime errors propagate; callers that mutate must not act on a guess.
    #[instrument(skip(self))]
    pub async fn observe(&self, stack_id: &str) -> Result<RuntimeObservation> {
        let stack = self.registry.lookup(stack_id)?;
        self.observe_stack(stack).await
    }

    /// Observe a resolved stack definition.
    pub async fn observe_stack(&self, stack: &StackDefinition) -> Result<RuntimeObservation> {
        let containers = self.runtime.containers(stack).await?;
        let observation = derive(stack, containers);
        debug!(stack = %stack.id, state = %observation.state, "Observed stack");
        Ok(observation)
    }

    /// Observe every stack, in catalog order.
    ///
    /// A stack the runtime fails to describe is reported as `Unknown` rather
    /// than failing the whole view.
    #[instrument(skip(self))]
    pub async fn observe_all(&self) -> Vec<RuntimeObservation> {
        let mut observations = Vec::with_capacity(self.registry.all().len());
        for stack in self.registry.all() {
            let observation = match self.observe_stack(stack).await {
                Ok(o) => o,
                Err(e) => {
                    warn!(stack = %stack.id, error = %e, "Cannot observe stack");
                    RuntimeObservation::unknown(&stack.id)
                }
            };
            observations.push(observation);
        }

        let live: Vec<&str> =
            observations.iter().filter(|o| o.state.is_live()).map(|o| o.stack_id.as_str()).collect();
        if live.len() > 1 {
            warn!(stacks = ?live, "More than one stack is live");
        }
        observations
    }
}

/// Reconcile a stack's definition with its containers.
pub fn derive(stack: &StackDefinition, containers: Vec<ContainerSummary>) -> RuntimeObservation {
    let is_live = |service: &str| containers.iter().any(|c| c.service == service && c.is_live());

    let (live_services, missing_services): (Vec<String>, Vec<String>) =
        stack.required_services().map(str::to_string).partition(|s| is_live(s));
    let any_live = containers.iter().any(ContainerSummary::is_live);

    let state = if !any_live {
        ObservedState::NotRunning
    } else if missing_services.is_empty() {
        ObservedState::Running
    } else {
        ObservedState::PartiallyRunning
    };

    let bound_ports = containers
        .iter()
        .filter(|c| c.is_live())
        .flat_map(|c| {
            c.published_ports.iter().map(|port| BoundPort {
                port: *port,
                container: Some(c.name.clone()),
                project: Some(stack.project.clone()),
            })
        })
        .collect();

    RuntimeObservation {
        stack_id: stack.id.clone(),
        state,
        live_services,
        missing_services,
        bound_ports,
        containers,
    }
}
