//! Readiness gating.
//!
//! After provisioning, the gate polls every readiness probe of a stack
//! concurrently against one shared deadline and folds the results into a
//! single verdict:
//! - Ready: every probe passed
//! - Degraded: every required probe passed, an optional one failed
//! - TimedOut: a required probe had not passed by the deadline

mod probe;

pub use probe::Prober;

use crate::adapters::ContainerRuntime;
use crate::types::{ReadinessProbe, StackDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeVerdict {
    Pass,
    Fail,
    /// Not decided: deadline reached on a required probe, or polling stopped
    Pending,
}

impl std::fmt::Display for ProbeVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// Aggregate verdict of a gate run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Ready,
    Degraded,
    TimedOut,
}

impl std::fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Degraded => write!(f, "degraded"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Per-probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub service: String,

    /// Probe kind: `http`, `tcp` or `exec`
    pub kind: String,

    /// What was probed (URL, address or command)
    pub target: String,

    pub required: bool,
    pub verdict: ProbeVerdict,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub elapsed_ms: u64,
}

/// Result of [`HealthGate::wait`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub verdict: HealthVerdict,

    /// In probe declaration order
    pub results: Vec<HealthCheckResult>,

    /// The caller's token fired before a verdict was reached
    pub cancelled: bool,
}

impl GateOutcome {
    /// Services whose required probes have not passed.
    pub fn pending_services(&self) -> Vec<String> {
        let mut services: Vec<String> = Vec::new();
        for r in self.results.iter().filter(|r| r.required && r.verdict != ProbeVerdict::Pass) {
            if !services.contains(&r.service) {
                services.push(r.service.clone());
            }
        }
        services
    }

    /// Services with a failed optional probe.
    pub fn failed_optional(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.required && r.verdict == ProbeVerdict::Fail)
            .map(|r| r.service.clone())
            .collect()
    }
}

/// Fold per-probe results into the aggregate verdict.
pub fn aggregate(results: &[HealthCheckResult]) -> HealthVerdict {
    if results.iter().any(|r| r.required && r.verdict != ProbeVerdict::Pass) {
        HealthVerdict::TimedOut
    } else if results.iter().any(|r| !r.required && r.verdict == ProbeVerdict::Fail) {
        HealthVerdict::Degraded
    } else {
        HealthVerdict::Ready
    }
}

/// Polls a stack's readiness probes.
#[derive(Clone)]
pub struct HealthGate {
    prober: Prober,
    attempt_timeout: Duration,
}

impl HealthGate {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, attempt_timeout: Duration) -> Self {
        Self { prober: Prober::new(runtime), attempt_timeout }
    }

    /// Poll every probe of `stack` until a verdict is reached.
    ///
    /// Returns as soon as all required probes pass; optional probes still
    /// polling at that point are stopped and reported `Pending`. Otherwise
    /// blocks until every probe has settled or `timeout` elapses. Cancelling
    /// `cancel` stops all polling at once.
    #[instrument(skip(self, stack, cancel), fields(stack = %stack.id))]
    pub async fn wait(
        &self,
        stack: &StackDefinition,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> GateOutcome {
        let deadline = Instant::now() + timeout;
        let gate_token = cancel.child_token();
        let probes = &stack.readiness_probes;
        let required_total = probes.iter().filter(|p| p.required).count();

        info!(probes = probes.len(), timeout_secs = timeout.as_secs(), "Waiting for stack readiness");

        let mut set = JoinSet::new();
        for (index, probe) in probes.iter().enumerate() {
            let task = ProbeTask {
                prober: self.prober.clone(),
                stack: stack.clone(),
                probe: probe.clone(),
                attempt_timeout: self.attempt_timeout,
                poll_interval,
                deadline,
                token: gate_token.clone(),
            };
            set.spawn(async move { (index, task.run().await) });
        }

        let mut slots: Vec<Option<HealthCheckResult>> = vec![None; probes.len()];
        let mut required_passed = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    debug!(
                        service = %result.service,
                        verdict = %result.verdict,
                        attempts = result.attempts,
                        "Probe settled"
                    );
                    if result.required && result.verdict == ProbeVerdict::Pass {
                        required_passed += 1;
                    }
                    slots[index] = Some(result);
                }
                Err(e) => warn!(error = %e, "Probe task failed"),
            }

            if required_total > 0 && required_passed == required_total && !gate_token.is_cancelled() {
                debug!("All required probes passed");
                gate_token.cancel();
            }
        }

        // A panicked task leaves its slot empty
        let results: Vec<HealthCheckResult> = slots
            .into_iter()
            .zip(probes)
            .map(|(slot, probe)| slot.unwrap_or_else(|| ProbeRun::new(probe).finish(ProbeVerdict::Pending)))
            .collect();

        let outcome = GateOutcome { verdict: aggregate(&results), results, cancelled: cancel.is_cancelled() };
        match outcome.verdict {
            HealthVerdict::Ready => info!("Stack ready"),
            HealthVerdict::Degraded => warn!(failed = ?outcome.failed_optional(), "Stack degraded"),
            HealthVerdict::TimedOut => warn!(pending = ?outcome.pending_services(), "Stack not ready"),
        }
        outcome
    }
}

/// One probe's polling loop.
struct ProbeTask {
    prober: Prober,
    stack: StackDefinition,
    probe: ReadinessProbe,
    attempt_timeout: Duration,
    poll_interval: Duration,
    deadline: Instant,
    token: CancellationToken,
}

impl ProbeTask {
    async fn run(self) -> HealthCheckResult {
        let mut run = ProbeRun::new(&self.probe);
        let mut failures = 0u32;

        loop {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                // Optional probes that never passed count as failed
                let verdict = if self.probe.required { ProbeVerdict::Pending } else { ProbeVerdict::Fail };
                return run.finish(verdict);
            }

            run.attempts += 1;
            let attempt = self.prober.attempt(
                &self.stack,
                &self.probe.service,
                &self.probe.kind,
                self.attempt_timeout.min(remaining),
            );
            let result = tokio::select! {
                biased;
                _ = self.token.cancelled() => return run.finish(ProbeVerdict::Pending),
                result = attempt => result,
            };

            match result {
                Ok(()) => return run.finish(ProbeVerdict::Pass),
                Err(e) => {
                    debug!(service = %self.probe.service, attempt = run.attempts, error = %e, "Probe attempt failed");
                    run.last_error = Some(e);
                    failures += 1;
                    if let (false, Some(retries)) = (self.probe.required, self.probe.retries) {
                        if failures >= retries {
                            return run.finish(ProbeVerdict::Fail);
                        }
                    }
                }
            }

            let pause = self.poll_interval.min(self.deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return run.finish(ProbeVerdict::Pending),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

/// Bookkeeping for a result under construction.
struct ProbeRun {
    service: String,
    kind: String,
    target: String,
    required: bool,
    attempts: u32,
    last_error: Option<String>,
    started: Instant,
}

impl ProbeRun {
    fn new(probe: &ReadinessProbe) -> Self {
        Self {
            service: probe.service.clone(),
            kind: probe.kind.to_string(),
            target: probe.kind.target(),
            required: probe.required,
            attempts: 0,
            last_error: None,
            started: Instant::now(),
        }
    }

    fn finish(self, verdict: ProbeVerdict) -> HealthCheckResult {
        HealthCheckResult {
            service: self.service,
            kind: self.kind,
            target: self.target,
            required: self.required,
            verdict,
            attempts: self.attempts,
            last_error: self.last_error,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
