//! Operator interaction seam.
//!
//! The controller never talks to a terminal itself. Decisions that need a
//! human (stopping a conflicting stack, purging volumes) and progress
//! notifications go through an [`Operator`].

use crate::conflict::ConflictReport;
use crate::lifecycle::LifecyclePhase;
use crate::types::RuntimeObservation;

/// Answer to a conflicting start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Stop the stacks holding the ports, then check again
    StopConflicting,
    Abort,
}

/// Someone (or something) answering lifecycle questions.
pub trait Operator: Send + Sync {
    /// Yes/no question; `false` must leave everything untouched.
    fn confirm(&self, prompt: &str) -> bool;

    /// Decide what to do about a non-empty conflict report.
    fn resolve_conflict(&self, report: &ConflictReport) -> ConflictResolution;

    /// The controller entered `phase`. `observation` carries a transient
    /// `Starting`/`Stopping` state while a mutation is in flight.
    fn phase_changed(&self, _stack_id: &str, _phase: LifecyclePhase, _observation: Option<&RuntimeObservation>) {}
}

/// Declines everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl Operator for NonInteractive {
    fn confirm(&self, _prompt: &str) -> bool {
        false
    }

    fn resolve_conflict(&self, _report: &ConflictReport) -> ConflictResolution {
        ConflictResolution::Abort
    }
}

/// Accepts confirmations but still refuses to stop other stacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Operator for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }

    fn resolve_conflict(&self, _report: &ConflictReport) -> ConflictResolution {
        ConflictResolution::Abort
    }
}
