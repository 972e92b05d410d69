//! Core domain types for pgstack.

pub mod observation;
pub mod stack;

// Re-exports
pub use observation::{BoundPort, ContainerState, ContainerSummary, ObservedState, RuntimeObservation};
pub use stack::{BundleService, ProbeKind, ReadinessProbe, StackDefinition};
