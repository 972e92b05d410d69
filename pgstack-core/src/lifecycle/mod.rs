//! Stack lifecycle controller.
//!
//! Sequences the components for each operation:
//!
//! ```text
//! start:   observe → ConflictChecking ─┬─ (conflict) → ConflictBlocked
//!                                      └─ Provisioning → HealthGating → Ready | Degraded | TimedOut
//! stop:    observe → Draining → Stopped
//! restart: stop → start   (never starts after an unclean stop)
//! clean:   observe → confirm → [Draining] → Purging → Purged
//! ```
//!
//! Every operation re-reads the runtime at entry and again before returning.
//! No lock is held over the runtime: two operators starting conflicting
//! stacks at the same moment can both pass the conflict check.

mod operator;

pub use operator::{AssumeYes, ConflictResolution, NonInteractive, Operator};

use crate::adapters::{ContainerRuntime, PortScanner};
use crate::config::Config;
use crate::conflict::{ConflictDetector, ConflictReport};
use crate::error::{Result, StackError};
use crate::health::{GateOutcome, HealthGate, HealthVerdict};
use crate::oplog::{LogLevel, OperationLog};
use crate::registry::StackRegistry;
use crate::state::StateTracker;
use crate::types::{ObservedState, RuntimeObservation, StackDefinition};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Phases an operation passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    ConflictChecking,
    StoppingConflicts,
    ConflictBlocked,
    Provisioning,
    HealthGating,
    Ready,
    Degraded,
    TimedOut,
    Draining,
    Stopped,
    AwaitingConfirmation,
    Refused,
    Purging,
    Purged,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConflictChecking => "checking conflicts",
            Self::StoppingConflicts => "stopping conflicting stacks",
            Self::ConflictBlocked => "blocked by conflict",
            Self::Provisioning => "provisioning",
            Self::HealthGating => "waiting for readiness",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::TimedOut => "timed out",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::AwaitingConfirmation => "awaiting confirmation",
            Self::Refused => "refused",
            Self::Purging => "purging volumes",
            Self::Purged => "purged",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Optional profiles to enable (e.g. "tools")
    pub profiles: Vec<String>,

    /// Provision despite conflicts
    pub force: bool,

    /// Overrides the configured readiness timeout
    pub timeout: Option<Duration>,

    /// Overrides the configured poll interval
    pub poll_interval: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StopOptions {
    /// Skip the graceful stop period
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanOptions {
    /// Skip the confirmation prompt
    pub assume_yes: bool,
}

/// Timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub health_timeout: Duration,
    pub poll_interval: Duration,
    pub probe_attempt_timeout: Duration,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            health_timeout: config.health_timeout(),
            poll_interval: config.poll_interval(),
            probe_attempt_timeout: config.probe_attempt_timeout(),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Ready,
    Degraded,
    /// Left running; a required probe never passed
    TimedOut,
    /// Nothing was provisioned
    ConflictBlocked,
}

impl std::fmt::Display for StartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Degraded => write!(f, "degraded"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::ConflictBlocked => write!(f, "conflict_blocked"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub stack_id: String,
    pub status: StartStatus,
    pub phases: Vec<LifecyclePhase>,

    /// Last conflict report (empty when the start went ahead cleanly)
    pub conflicts: ConflictReport,

    /// Stacks stopped to free ports
    pub stopped_stacks: Vec<String>,

    /// Absent when provisioning never happened
    pub health: Option<GateOutcome>,

    /// Fresh observation taken before returning
    pub observation: RuntimeObservation,
}

impl StartOutcome {
    /// The recoverable error matching a non-successful status.
    pub fn to_error(&self, timeout: Duration) -> Option<StackError> {
        match self.status {
            StartStatus::Ready | StartStatus::Degraded => None,
            StartStatus::ConflictBlocked => Some(StackError::Conflict { report: self.conflicts.clone() }),
            StartStatus::TimedOut => Some(StackError::HealthTimeout {
                stack_id: self.stack_id.clone(),
                timeout_secs: timeout.as_secs(),
                pending: self.health.as_ref().map(GateOutcome::pending_services).unwrap_or_default(),
            }),
        }
    }

    /// Readiness polling was interrupted by the operator.
    pub fn interrupted(&self) -> bool {
        self.health.as_ref().is_some_and(|h| h.cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    /// Nothing was live; no runtime call made
    AlreadyStopped,
    /// The runtime accepted `down` but containers are still live
    Incomplete,
}

impl std::fmt::Display for StopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::AlreadyStopped => write!(f, "already_stopped"),
            Self::Incomplete => write!(f, "incomplete"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    pub stack_id: String,
    pub status: StopStatus,
    pub phases: Vec<LifecyclePhase>,
    pub observation: RuntimeObservation,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartOutcome {
    pub stop: StopOutcome,
    pub start: StartOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanStatus {
    Purged,
    /// Confirmation declined; nothing touched
    Refused,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanOutcome {
    pub stack_id: String,
    pub status: CleanStatus,
    pub phases: Vec<LifecyclePhase>,

    /// The stack was live and got stopped first
    pub stopped_first: bool,

    pub observation: RuntimeObservation,
}

// ============================================================================
// Controller
// ============================================================================

/// Drives start/stop/restart/clean for the stacks of one registry.
pub struct LifecycleController {
    registry: Arc<StackRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    tracker: StateTracker,
    detector: ConflictDetector,
    gate: HealthGate,
    operator: Arc<dyn Operator>,
    settings: LifecycleSettings,
    oplog: OperationLog,
    cancel: CancellationToken,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<StackRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        scanner: Arc<dyn PortScanner>,
        operator: Arc<dyn Operator>,
        settings: LifecycleSettings,
    ) -> Self {
        let tracker = StateTracker::new(registry.clone(), runtime.clone());
        let detector = ConflictDetector::new(tracker.clone(), runtime.clone(), scanner);
        let gate = HealthGate::new(runtime.clone(), settings.probe_attempt_timeout);
        Self {
            registry,
            runtime,
            tracker,
            detector,
            gate,
            operator,
            settings,
            oplog: OperationLog::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    /// Record every operation to `oplog`.
    pub fn with_operation_log(mut self, oplog: OperationLog) -> Self {
        self.oplog = oplog;
        self
    }

    /// Stop readiness polling when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &StackRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Fresh observation of every stack.
    pub async fn status(&self) -> Vec<RuntimeObservation> {
        self.tracker.observe_all().await
    }

    /// Start a stack.
    ///
    /// Conflicts and readiness timeouts come back as outcomes; provisioning
    /// failures and an unreachable runtime come back as errors.
    #[instrument(skip(self, opts), fields(force = opts.force))]
    pub async fn start(&self, stack_id: &str, opts: &StartOptions) -> Result<StartOutcome> {
        let started = Instant::now();
        let result = match self.registry.lookup(stack_id) {
            Ok(stack) => self.start_stack(stack, opts).await,
            Err(e) => Err(e),
        };
        self.log_result("start", stack_id, started, &result, |o| {
            let level = match o.status {
                StartStatus::Ready => LogLevel::Info,
                _ => LogLevel::Warn,
            };
            (level, format!("outcome={}", o.status))
        });
        result
    }

    /// Stop a stack. Stopping a stack that is not running is a no-op.
    #[instrument(skip(self, opts), fields(force = opts.force))]
    pub async fn stop(&self, stack_id: &str, opts: &StopOptions) -> Result<StopOutcome> {
        let started = Instant::now();
        let result = match self.registry.lookup(stack_id) {
            Ok(stack) => self.stop_stack(stack, opts).await,
            Err(e) => Err(e),
        };
        self.log_result("stop", stack_id, started, &result, |o| {
            let level = if o.status == StopStatus::Incomplete { LogLevel::Warn } else { LogLevel::Info };
            (level, format!("outcome={}", o.status))
        });
        result
    }

    /// Stop then start. A failed or unclean stop aborts before anything is started.
    #[instrument(skip(self, stop_opts, start_opts))]
    pub async fn restart(
        &self,
        stack_id: &str,
        stop_opts: &StopOptions,
        start_opts: &StartOptions,
    ) -> Result<RestartOutcome> {
        let started = Instant::now();
        let result = self.restart_stack(stack_id, stop_opts, start_opts).await;
        self.log_result("restart", stack_id, started, &result, |o| {
            let level = if o.start.status == StartStatus::Ready { LogLevel::Info } else { LogLevel::Warn };
            (level, format!("outcome={}", o.start.status))
        });
        result
    }

    /// Delete a stack's volumes after confirmation, stopping it first if live.
    #[instrument(skip(self, opts))]
    pub async fn clean(&self, stack_id: &str, opts: &CleanOptions) -> Result<CleanOutcome> {
        let started = Instant::now();
        let result = match self.registry.lookup(stack_id) {
            Ok(stack) => self.clean_stack(stack, opts).await,
            Err(e) => Err(e),
        };
        self.log_result("clean", stack_id, started, &result, |o| match o.status {
            CleanStatus::Purged => (LogLevel::Info, "outcome=purged".to_string()),
            CleanStatus::Refused => (LogLevel::Warn, "outcome=refused".to_string()),
        });
        result
    }

    /// Stream a stack's logs.
    pub async fn logs(&self, stack_id: &str, follow: bool, tail: Option<u32>) -> Result<()> {
        let stack = self.registry.lookup(stack_id)?;
        self.runtime.logs(stack, follow, tail).await
    }

    async fn start_stack(&self, stack: &StackDefinition, opts: &StartOptions) -> Result<StartOutcome> {
        for profile in &opts.profiles {
            if !stack.optional_profiles.contains(profile) {
                return Err(StackError::InvalidConfig {
                    reason: format!("stack '{}' has no profile '{}'", stack.id, profile),
                });
            }
        }

        let mut phases = Vec::new();
        let current = self.tracker.observe_stack(stack).await?;
        debug!(stack = %stack.id, state = %current.state, "Starting from observed state");

        self.enter(&mut phases, stack, LifecyclePhase::ConflictChecking, None);
        let mut report = self.detector.check(stack).await?;
        let mut stopped_stacks = Vec::new();

        if !report.is_empty() {
            if opts.force {
                warn!(stack = %stack.id, conflicts = %report.summary(), "Starting despite port conflicts");
            } else {
                match self.operator.resolve_conflict(&report) {
                    ConflictResolution::Abort => {
                        return self.blocked(stack, phases, report, stopped_stacks).await;
                    }
                    ConflictResolution::StopConflicting => {
                        self.enter(&mut phases, stack, LifecyclePhase::StoppingConflicts, None);
                        for other_id in report.conflicting_stacks() {
                            let other = self.registry.lookup(&other_id)?;
                            info!(stack = %other.id, "Stopping conflicting stack");
                            self.stop_stack(other, &StopOptions::default()).await?;
                            stopped_stacks.push(other_id);
                        }

                        // Stopping may not have freed everything
                        self.enter(&mut phases, stack, LifecyclePhase::ConflictChecking, None);
                        report = self.detector.check(stack).await?;
                        if !report.is_empty() {
                            return self.blocked(stack, phases, report, stopped_stacks).await;
                        }
                    }
                }
            }
        }

        let starting = current.in_transition(ObservedState::Starting);
        self.enter(&mut phases, stack, LifecyclePhase::Provisioning, Some(&starting));
        self.runtime.up(stack, &opts.profiles).await?;

        self.enter(&mut phases, stack, LifecyclePhase::HealthGating, Some(&starting));
        let timeout = opts.timeout.unwrap_or(self.settings.health_timeout);
        let poll_interval = opts.poll_interval.unwrap_or(self.settings.poll_interval);
        let health = self.gate.wait(stack, timeout, poll_interval, &self.cancel).await;

        let (status, phase) = match health.verdict {
            HealthVerdict::Ready => (StartStatus::Ready, LifecyclePhase::Ready),
            HealthVerdict::Degraded => (StartStatus::Degraded, LifecyclePhase::Degraded),
            HealthVerdict::TimedOut => (StartStatus::TimedOut, LifecyclePhase::TimedOut),
        };

        let observation = self.tracker.observe_stack(stack).await?;
        if status != StartStatus::TimedOut && observation.state != ObservedState::Running {
            warn!(
                stack = %stack.id,
                state = %observation.state,
                missing = ?observation.missing_services,
                "Probes passed but the runtime disagrees"
            );
        }
        self.enter(&mut phases, stack, phase, Some(&observation));

        Ok(StartOutcome {
            stack_id: stack.id.clone(),
            status,
            phases,
            conflicts: report,
            stopped_stacks,
            health: Some(health),
            observation,
        })
    }

    async fn blocked(
        &self,
        stack: &StackDefinition,
        mut phases: Vec<LifecyclePhase>,
        report: ConflictReport,
        stopped_stacks: Vec<String>,
    ) -> Result<StartOutcome> {
        warn!(stack = %stack.id, conflicts = %report.summary(), "Start blocked by port conflicts");
        let observation = self.tracker.observe_stack(stack).await?;
        self.enter(&mut phases, stack, LifecyclePhase::ConflictBlocked, Some(&observation));
        Ok(StartOutcome {
            stack_id: stack.id.clone(),
            status: StartStatus::ConflictBlocked,
            phases,
            conflicts: report,
            stopped_stacks,
            health: None,
            observation,
        })
    }

    async fn stop_stack(&self, stack: &StackDefinition, opts: &StopOptions) -> Result<StopOutcome> {
        let mut phases = Vec::new();
        let current = self.tracker.observe_stack(stack).await?;

        if !current.needs_drain() {
            info!(stack = %stack.id, "Stack is not running");
            return Ok(StopOutcome {
                stack_id: stack.id.clone(),
                status: StopStatus::AlreadyStopped,
                phases,
                observation: current,
            });
        }

        let stopping = current.in_transition(ObservedState::Stopping);
        self.enter(&mut phases, stack, LifecyclePhase::Draining, Some(&stopping));
        self.runtime.down(stack, opts.force).await?;

        let observation = self.tracker.observe_stack(stack).await?;
        let status = if observation.needs_drain() {
            warn!(stack = %stack.id, state = %observation.state, "Containers still live after stop");
            StopStatus::Incomplete
        } else {
            self.enter(&mut phases, stack, LifecyclePhase::Stopped, Some(&observation));
            StopStatus::Stopped
        };

        Ok(StopOutcome { stack_id: stack.id.clone(), status, phases, observation })
    }

    async fn restart_stack(
        &self,
        stack_id: &str,
        stop_opts: &StopOptions,
        start_opts: &StartOptions,
    ) -> Result<RestartOutcome> {
        let stack = self.registry.lookup(stack_id)?;

        let stop = self
            .stop_stack(stack, stop_opts)
            .await
            .map_err(|e| StackError::RestartAborted { stack_id: stack.id.clone(), source: Box::new(e) })?;

        if stop.status == StopStatus::Incomplete {
            return Err(StackError::RestartAborted {
                stack_id: stack.id.clone(),
                source: Box::new(StackError::Provisioning {
                    stack_id: stack.id.clone(),
                    action: "stop".to_string(),
                    diagnostic: format!("services still live: {}", stop.observation.live_services.join(", ")),
                }),
            });
        }

        let start = self.start_stack(stack, start_opts).await?;
        Ok(RestartOutcome { stop, start })
    }

    async fn clean_stack(&self, stack: &StackDefinition, opts: &CleanOptions) -> Result<CleanOutcome> {
        let mut phases = Vec::new();
        let current = self.tracker.observe_stack(stack).await?;
        let live = current.needs_drain();

        self.enter(&mut phases, stack, LifecyclePhase::AwaitingConfirmation, Some(&current));
        let prompt = if live {
            format!("Stop '{}' and delete all of its volumes? This cannot be undone.", stack.id)
        } else {
            format!("Delete all volumes of '{}'? This cannot be undone.", stack.id)
        };
        if !(opts.assume_yes || self.operator.confirm(&prompt)) {
            info!(stack = %stack.id, "Clean not confirmed");
            self.enter(&mut phases, stack, LifecyclePhase::Refused, Some(&current));
            return Ok(CleanOutcome {
                stack_id: stack.id.clone(),
                status: CleanStatus::Refused,
                phases,
                stopped_first: false,
                observation: current,
            });
        }

        if live {
            let stop = self.stop_stack(stack, &StopOptions::default()).await?;
            phases.extend(stop.phases);
            if stop.status == StopStatus::Incomplete {
                return Err(StackError::Provisioning {
                    stack_id: stack.id.clone(),
                    action: "stop".to_string(),
                    diagnostic: "containers still live; volumes left in place".to_string(),
                });
            }
        }

        self.enter(&mut phases, stack, LifecyclePhase::Purging, None);
        self.runtime.purge_volumes(stack).await?;

        let observation = self.tracker.observe_stack(stack).await?;
        self.enter(&mut phases, stack, LifecyclePhase::Purged, Some(&observation));
        Ok(CleanOutcome {
            stack_id: stack.id.clone(),
            status: CleanStatus::Purged,
            phases,
            stopped_first: live,
            observation,
        })
    }

    fn enter(
        &self,
        phases: &mut Vec<LifecyclePhase>,
        stack: &StackDefinition,
        phase: LifecyclePhase,
        observation: Option<&RuntimeObservation>,
    ) {
        debug!(stack = %stack.id, %phase, "Lifecycle phase");
        phases.push(phase);
        self.operator.phase_changed(&stack.id, phase, observation);
    }

    fn log_result<T>(
        &self,
        operation: &str,
        stack_id: &str,
        started: Instant,
        result: &Result<T>,
        describe: impl FnOnce(&T) -> (LogLevel, String),
    ) {
        let duration_ms = started.elapsed().as_millis();
        match result {
            Ok(outcome) => {
                let (level, detail) = describe(outcome);
                self.oplog.record(level, operation, stack_id, &format!("{} duration_ms={}", detail, duration_ms));
            }
            Err(e) => {
                let detail = format!("outcome=error duration_ms={} error=\"{}\"", duration_ms, e);
                self.oplog.record(LogLevel::Error, operation, stack_id, &detail);
            }
        }
    }
}
