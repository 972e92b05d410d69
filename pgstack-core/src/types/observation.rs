//! Live runtime observations.
//!
//! Everything here is derived from the container runtime during a single
//! invocation and discarded afterwards.

use serde::{Deserialize, Serialize};

/// Observed state of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedState {
    /// No service of the stack has a live container
    NotRunning,

    /// Provisioning in flight (assigned by the lifecycle controller only)
    Starting,

    /// Every required service has a live, non-restarting container
    Running,

    /// Some but not all required services are live
    PartiallyRunning,

    /// Drain in flight (assigned by the lifecycle controller only)
    Stopping,

    /// The runtime could not be asked
    Unknown,
}

impl ObservedState {
    /// Whether any part of the stack holds runtime resources.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::PartiallyRunning | Self::Starting | Self::Stopping)
    }
}

impl std::fmt::Display for ObservedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRunning => write!(f, "not running"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::PartiallyRunning => write!(f, "partial"),
            Self::Stopping => write!(f, "stopping"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Container state as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Other(String),
}

impl ContainerState {
    /// Parse a runtime state string ("running", "exited", ...).
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "created" => Self::Created,
            "running" | "up" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Restarting => write!(f, "restarting"),
            Self::Paused => write!(f, "paused"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// One container of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Container name
    pub name: String,

    /// Compose service the container runs
    pub service: String,

    pub state: ContainerState,

    /// Runtime health string, when the image defines a healthcheck
    pub health: Option<String>,

    /// Host ports published by this container
    pub published_ports: Vec<u16>,
}

impl ContainerSummary {
    /// Live means running and not in a restart loop.
    pub fn is_live(&self) -> bool {
        self.state == ContainerState::Running
    }

    /// Still holds runtime resources: running, crash-looping, paused or created.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ContainerState::Running | ContainerState::Restarting | ContainerState::Paused | ContainerState::Created
        )
    }
}

/// A host port currently held, with its owner when it can be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundPort {
    pub port: u16,

    /// Owning container name
    pub container: Option<String>,

    /// Compose project of the owning container
    pub project: Option<String>,
}

/// Reconciled view of one stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeObservation {
    pub stack_id: String,

    pub state: ObservedState,

    /// Required services with a live container
    pub live_services: Vec<String>,

    /// Required services without a live container
    pub missing_services: Vec<String>,

    /// Ports held by this stack's containers
    pub bound_ports: Vec<BoundPort>,

    pub containers: Vec<ContainerSummary>,
}

impl RuntimeObservation {
    /// Observation for a stack the runtime could not be asked about.
    pub fn unknown(stack_id: &str) -> Self {
        Self {
            stack_id: stack_id.to_string(),
            state: ObservedState::Unknown,
            live_services: Vec::new(),
            missing_services: Vec::new(),
            bound_ports: Vec::new(),
            containers: Vec::new(),
        }
    }

    /// Copy of this observation stamped with a transient in-flight state.
    pub fn in_transition(&self, state: ObservedState) -> Self {
        Self { state, ..self.clone() }
    }

    /// Whether this stack's containers hold `port`.
    pub fn holds_port(&self, port: u16) -> bool {
        self.bound_ports.iter().any(|p| p.port == port)
    }

    /// Whether stopping this stack has anything to do.
    ///
    /// A crash-looping stack derives as not running yet its restart policy
    /// keeps grabbing ports, so it still needs a drain.
    pub fn needs_drain(&self) -> bool {
        self.state.is_live() || self.containers.iter().any(ContainerSummary::is_active)
    }

    /// Whether `container` belongs to this stack.
    pub fn owns_container(&self, container: &str) -> bool {
        self.containers.iter().any(|c| c.name == container)
    }
}
