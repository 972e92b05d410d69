//! pgstack core library
//!
//! Lifecycle management for mutually exclusive PostgreSQL deployment stacks
//! run under a container runtime. The runtime is the only source of truth:
//! nothing here persists which stack is active.

pub mod adapters;
pub mod compose;
pub mod config;
pub mod conflict;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod monitor;
pub mod observability;
pub mod oplog;
pub mod paths;
pub mod registry;
pub mod state;
pub mod types;

// Re-export commonly used items
pub use adapters::{AdapterFactory, ContainerRuntime, ListenerScanner, PortScanner};
pub use config::Config;
pub use conflict::{ConflictDetector, ConflictReport, ConflictingPort, PortHolder};
pub use error::{Result, StackError};
pub use health::{GateOutcome, HealthCheckResult, HealthGate, HealthVerdict, ProbeVerdict};
pub use lifecycle::{
    AssumeYes, CleanOptions, CleanOutcome, CleanStatus, ConflictResolution, LifecycleController, LifecyclePhase,
    LifecycleSettings, NonInteractive, Operator, RestartOutcome, StartOptions, StartOutcome, StartStatus, StopOptions,
    StopOutcome, StopStatus,
};
pub use monitor::{ResourceMonitor, ResourceSnapshot};
pub use observability::init as init_observability;
pub use oplog::OperationLog;
pub use registry::StackRegistry;
pub use state::StateTracker;
pub use types::{ObservedState, RuntimeObservation, StackDefinition};
