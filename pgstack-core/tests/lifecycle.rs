//! Integration tests for stack lifecycle operations.
//!
//! These tests drive the full controller:
//! - Catalog loading from compose files on disk
//! - Conflict detection between running stacks
//! - Provisioning and readiness gating
//! - Stop, restart and clean
//!
//! Tests use the in-memory runtime and a fake port scanner for portability.

use pgstack_core::{
    adapters::{MockPortScanner, MockRuntime, RuntimeCall},
    conflict::PortHolder,
    error::StackError,
    lifecycle::{ConflictResolution, Operator},
    oplog::OperationLog,
    types::ContainerState,
    AssumeYes, CleanOptions, CleanStatus, ConflictReport, LifecycleController, LifecyclePhase, LifecycleSettings,
    NonInteractive, ObservedState, StackRegistry, StartOptions, StartStatus, StopOptions, StopStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const DEV_BUNDLE: &str = r#"
services:
  postgres:
    image: postgres:16
    ports: ["5432:5432"]
  pgadmin:
    image: dpage/pgadmin4
    profiles: [tools]
    ports: ["5050:80"]
"#;

const CITUS_BUNDLE: &str = r#"
services:
  coordinator:
    image: citusdata/citus:12
    ports: ["5432:5432"]
  worker1:
    image: citusdata/citus:12
    ports: ["5433:5432"]
  worker2:
    image: citusdata/citus:12
    ports: ["5434:5432"]
"#;

const PATRONI_BUNDLE: &str = r#"
services:
  etcd:
    image: quay.io/coreos/etcd:v3.5.9
  patroni1:
    image: patroni:latest
  patroni2:
    image: patroni:latest
  haproxy:
    image: haproxy:2.8
    ports: ["7000:7000"]
"#;

/// Catalog and bundles in a temp dir.
struct Fixture {
    _dir: TempDir,
    registry: Arc<StackRegistry>,
}

impl Fixture {
    /// `haproxy_port` is where the patroni stats probe connects.
    fn new(haproxy_port: u16) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("docker-compose.yml"), DEV_BUNDLE).unwrap();
        std::fs::write(dir.path().join("docker-compose.citus.yml"), CITUS_BUNDLE).unwrap();
        std::fs::write(dir.path().join("docker-compose.patroni.yml"), PATRONI_BUNDLE).unwrap();

        let catalog = format!(
            r#"
stacks:
  - id: dev
    bundle: docker-compose.yml
    ports: [5432, 5050]
    profiles: [tools]
    probes:
      - service: postgres
        kind: exec
        command: ["pg_isready", "-U", "postgres"]
  - id: citus
    bundle: docker-compose.citus.yml
    ports: [5432, 5433, 5434, 5435]
    probes:
      - service: coordinator
        kind: exec
        command: ["pg_isready"]
      - service: worker1
        kind: exec
        command: ["pg_isready"]
      - service: worker2
        kind: exec
        command: ["pg_isready"]
  - id: patroni
    bundle: docker-compose.patroni.yml
    ports: [7000]
    probes:
      - service: patroni1
        kind: exec
        command: ["true"]
      - service: patroni2
        kind: exec
        command: ["true"]
      - service: haproxy
        kind: tcp
        host: 127.0.0.1
        port: {}
"#,
            haproxy_port
        );
        std::fs::write(dir.path().join("stacks.yaml"), catalog).unwrap();

        let registry = Arc::new(StackRegistry::from_file(&dir.path().join("stacks.yaml")).unwrap());
        Self { _dir: dir, registry }
    }

    fn controller(&self, runtime: &Arc<MockRuntime>, operator: Arc<dyn Operator>) -> LifecycleController {
        self.controller_with_scanner(runtime, Arc::new(MockPortScanner::default()), operator)
    }

    fn controller_with_scanner(
        &self,
        runtime: &Arc<MockRuntime>,
        scanner: Arc<MockPortScanner>,
        operator: Arc<dyn Operator>,
    ) -> LifecycleController {
        let settings = LifecycleSettings {
            health_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            probe_attempt_timeout: Duration::from_millis(200),
        };
        LifecycleController::new(
            self.registry.clone(),
            runtime.clone(),
            scanner,
            operator,
            settings,
        )
    }
}

/// A local port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Operator that agrees to stop conflicting stacks.
#[derive(Default)]
struct StopsConflicts {
    asked: AtomicUsize,
}

impl Operator for StopsConflicts {
    fn confirm(&self, _prompt: &str) -> bool {
        false
    }

    fn resolve_conflict(&self, _report: &ConflictReport) -> ConflictResolution {
        self.asked.fetch_add(1, Ordering::SeqCst);
        ConflictResolution::StopConflicting
    }
}

#[tokio::test]
async fn test_dev_then_citus_reports_conflict() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    let dev = ctl.start("dev", &StartOptions::default()).await.unwrap();
    assert_eq!(dev.status, StartStatus::Ready);

    let citus = ctl.start("citus", &StartOptions::default()).await.unwrap();
    assert_eq!(citus.status, StartStatus::ConflictBlocked);
    assert_eq!(citus.conflicts.conflicting_ports.len(), 1);
    assert_eq!(citus.conflicts.conflicting_ports[0].port, 5432);
    assert_eq!(citus.conflicts.conflicting_ports[0].held_by, PortHolder::Stack("dev".to_string()));
    assert_eq!(citus.phases.last(), Some(&LifecyclePhase::ConflictBlocked));
    assert!(citus.health.is_none());
    assert!(matches!(citus.to_error(Duration::from_secs(5)), Some(StackError::Conflict { .. })));

    // Blocked means nothing was provisioned for citus
    let ups: Vec<_> = runtime.calls().into_iter().filter(|c| matches!(c, RuntimeCall::Up { .. })).collect();
    assert_eq!(ups.len(), 1);
}

#[tokio::test]
async fn test_conflict_symmetry() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    ctl.start("citus", &StartOptions::default()).await.unwrap();
    let dev = ctl.start("dev", &StartOptions::default()).await.unwrap();
    assert_eq!(dev.status, StartStatus::ConflictBlocked);
    assert_eq!(dev.conflicts.conflicting_stacks(), vec!["citus"]);
}

#[tokio::test]
async fn test_start_running_stack_has_no_self_conflict() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    ctl.start("dev", &StartOptions::default()).await.unwrap();
    let again = ctl.start("dev", &StartOptions::default()).await.unwrap();
    assert_eq!(again.status, StartStatus::Ready);
    assert!(again.conflicts.is_empty());
}

#[tokio::test]
async fn test_force_starts_despite_conflict() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    ctl.start("dev", &StartOptions::default()).await.unwrap();
    let citus = ctl.start("citus", &StartOptions { force: true, ..Default::default() }).await.unwrap();
    assert_ne!(citus.status, StartStatus::ConflictBlocked);
    assert!(!citus.conflicts.is_empty());
}

#[tokio::test]
async fn test_stop_conflicting_then_recheck() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let operator = Arc::new(StopsConflicts::default());
    let ctl = fixture.controller(&runtime, operator.clone());

    ctl.start("dev", &StartOptions::default()).await.unwrap();
    let citus = ctl.start("citus", &StartOptions::default()).await.unwrap();

    assert_eq!(operator.asked.load(Ordering::SeqCst), 1);
    assert_eq!(citus.status, StartStatus::Ready);
    assert_eq!(citus.stopped_stacks, vec!["dev"]);
    assert_eq!(
        citus.phases[..3],
        [LifecyclePhase::ConflictChecking, LifecyclePhase::StoppingConflicts, LifecyclePhase::ConflictChecking]
    );
    assert_eq!(ctl.tracker().observe("dev").await.unwrap().state, ObservedState::NotRunning);
}

#[tokio::test]
async fn test_external_holder_still_blocks_after_auto_stop() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    runtime.bind_external_port(5433);
    let ctl = fixture.controller(&runtime, Arc::new(StopsConflicts::default()));

    ctl.start("dev", &StartOptions::default()).await.unwrap();
    let citus = ctl.start("citus", &StartOptions::default()).await.unwrap();

    assert_eq!(citus.status, StartStatus::ConflictBlocked);
    assert_eq!(citus.stopped_stacks, vec!["dev"]);
    assert_eq!(citus.conflicts.summary(), "5433 (external)");
}

#[tokio::test]
async fn test_host_listener_blocks_when_runtime_cannot_list_ports() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    runtime.set_ports_unsupported(true);
    let scanner = Arc::new(MockPortScanner::default());
    let ctl = fixture.controller_with_scanner(&runtime, scanner.clone(), Arc::new(StopsConflicts::default()));

    scanner.hold(5434);
    let citus = ctl.start("citus", &StartOptions::default()).await.unwrap();
    assert_eq!(citus.status, StartStatus::ConflictBlocked);
    assert_eq!(citus.conflicts.conflicting_ports[0].held_by, PortHolder::External);
    assert!(citus.conflicts.has_external());
    assert!(citus.stopped_stacks.is_empty());
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_stop_twice_is_noop() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));
    ctl.start("dev", &StartOptions::default()).await.unwrap();

    let first = ctl.stop("dev", &StopOptions::default()).await.unwrap();
    assert_eq!(first.status, StopStatus::Stopped);
    let calls_after_first = runtime.calls().len();

    let second = ctl.stop("dev", &StopOptions::default()).await.unwrap();
    assert_eq!(second.status, StopStatus::AlreadyStopped);
    assert_eq!(runtime.calls().len(), calls_after_first);
}

#[tokio::test]
async fn test_stop_drains_crash_looping_stack() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    let citus = fixture.registry.lookup("citus").unwrap();
    for service in ["coordinator", "worker1", "worker2"] {
        runtime.set_service_state(citus, service, ContainerState::Restarting);
    }
    assert_eq!(ctl.tracker().observe("citus").await.unwrap().state, ObservedState::NotRunning);

    let outcome = ctl.stop("citus", &StopOptions::default()).await.unwrap();
    assert_eq!(outcome.status, StopStatus::Stopped);
    assert_eq!(runtime.calls(), vec![RuntimeCall::Down { stack: "citus".to_string(), force: false }]);
    assert!(outcome.observation.containers.is_empty());

    // Exited containers hold nothing; nothing to drain
    runtime.set_service_state(citus, "coordinator", ContainerState::Exited);
    let again = ctl.stop("citus", &StopOptions::default()).await.unwrap();
    assert_eq!(again.status, StopStatus::AlreadyStopped);
    assert_eq!(runtime.calls().len(), 1);
}

#[tokio::test]
async fn test_status_reflects_runtime_after_operations() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    ctl.start("dev", &StartOptions::default()).await.unwrap();
    let status = ctl.status().await;
    let ids: Vec<_> = status.iter().map(|o| o.stack_id.as_str()).collect();
    assert_eq!(ids, vec!["dev", "citus", "patroni"]);
    assert_eq!(status[0].state, ObservedState::Running);
    assert_eq!(status[1].state, ObservedState::NotRunning);

    // A container crashing outside our control shows up on the next read
    let dev = fixture.registry.lookup("dev").unwrap();
    runtime.set_service_state(dev, "postgres", ContainerState::Exited);
    assert_eq!(ctl.status().await[0].state, ObservedState::NotRunning);
}

#[tokio::test]
async fn test_two_of_three_required_probes_times_out() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    runtime.keep_service_down("worker2");
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    let opts = StartOptions { timeout: Some(Duration::from_millis(300)), ..Default::default() };
    let outcome = ctl.start("citus", &opts).await.unwrap();

    assert_eq!(outcome.status, StartStatus::TimedOut);
    let health = outcome.health.as_ref().unwrap();
    assert_eq!(health.pending_services(), vec!["worker2"]);
    assert_eq!(outcome.observation.state, ObservedState::PartiallyRunning);
    assert!(matches!(
        outcome.to_error(Duration::from_millis(300)),
        Some(StackError::HealthTimeout { pending, .. }) if pending == vec!["worker2".to_string()]
    ));
}

#[tokio::test]
async fn test_patroni_haproxy_timeout_leaves_stack_running() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    let opts = StartOptions { timeout: Some(Duration::from_millis(300)), ..Default::default() };
    let outcome = ctl.start("patroni", &opts).await.unwrap();
    assert_eq!(outcome.status, StartStatus::TimedOut);
    assert_eq!(outcome.health.as_ref().unwrap().pending_services(), vec!["haproxy"]);

    // Not rolled back
    assert!(!runtime.calls().iter().any(|c| matches!(c, RuntimeCall::Down { .. })));
    assert_eq!(ctl.tracker().observe("patroni").await.unwrap().state, ObservedState::Running);
}

#[tokio::test]
async fn test_patroni_ready_when_haproxy_answers() {
    let haproxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fixture = Fixture::new(haproxy.local_addr().unwrap().port());
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    let outcome = ctl.start("patroni", &StartOptions::default()).await.unwrap();
    assert_eq!(outcome.status, StartStatus::Ready);
}

#[tokio::test]
async fn test_tools_profile_is_passed_through() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    let opts = StartOptions { profiles: vec!["tools".to_string()], ..Default::default() };
    let outcome = ctl.start("dev", &opts).await.unwrap();
    assert_eq!(outcome.status, StartStatus::Ready);
    assert_eq!(runtime.calls()[0], RuntimeCall::Up { stack: "dev".to_string(), profiles: vec!["tools".to_string()] });
    assert!(outcome.observation.holds_port(5050));
}

#[tokio::test]
async fn test_clean_refused_without_confirmation() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));
    ctl.start("dev", &StartOptions::default()).await.unwrap();

    let outcome = ctl.clean("dev", &CleanOptions::default()).await.unwrap();
    assert_eq!(outcome.status, CleanStatus::Refused);
    assert!(runtime.has_volumes(fixture.registry.lookup("dev").unwrap()));
    assert!(!runtime.calls().iter().any(|c| matches!(c, RuntimeCall::PurgeVolumes { .. } | RuntimeCall::Down { .. })));
}

#[tokio::test]
async fn test_clean_stops_then_purges() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(AssumeYes));
    ctl.start("dev", &StartOptions::default()).await.unwrap();

    let outcome = ctl.clean("dev", &CleanOptions::default()).await.unwrap();
    assert_eq!(outcome.status, CleanStatus::Purged);
    assert!(outcome.stopped_first);
    assert_eq!(
        outcome.phases,
        vec![
            LifecyclePhase::AwaitingConfirmation,
            LifecyclePhase::Draining,
            LifecyclePhase::Stopped,
            LifecyclePhase::Purging,
            LifecyclePhase::Purged
        ]
    );
    assert!(!runtime.has_volumes(fixture.registry.lookup("dev").unwrap()));
}

#[tokio::test]
async fn test_clean_with_assume_yes_flag() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    let outcome = ctl.clean("citus", &CleanOptions { assume_yes: true }).await.unwrap();
    assert_eq!(outcome.status, CleanStatus::Purged);
    assert!(!outcome.stopped_first);
}

#[tokio::test]
async fn test_restart_aborts_when_stop_fails() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));
    ctl.start("dev", &StartOptions::default()).await.unwrap();
    runtime.fail_down("network pgstack-dev_default has active endpoints");

    let err = ctl.restart("dev", &StopOptions::default(), &StartOptions::default()).await.unwrap_err();
    assert!(matches!(err, StackError::RestartAborted { .. }));
    assert!(err.to_string().contains("active endpoints"));

    // Only the initial start ever called up
    let ups = runtime.calls().into_iter().filter(|c| matches!(c, RuntimeCall::Up { .. })).count();
    assert_eq!(ups, 1);
}

#[tokio::test]
async fn test_restart_running_stack() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));
    ctl.start("dev", &StartOptions::default()).await.unwrap();

    let outcome = ctl.restart("dev", &StopOptions::default(), &StartOptions::default()).await.unwrap();
    assert_eq!(outcome.stop.status, StopStatus::Stopped);
    assert_eq!(outcome.start.status, StartStatus::Ready);
}

#[tokio::test]
async fn test_runtime_unavailable_aborts_without_mutation() {
    let fixture = Fixture::new(closed_port().await);
    let runtime = Arc::new(MockRuntime::new());
    runtime.set_unavailable(true);
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive));

    assert!(matches!(
        ctl.start("dev", &StartOptions::default()).await,
        Err(StackError::RuntimeUnavailable { .. })
    ));
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_stack() {
    let fixture = Fixture::new(closed_port().await);
    let ctl = fixture.controller(&Arc::new(MockRuntime::new()), Arc::new(NonInteractive));
    assert!(matches!(
        ctl.stop("timescale", &StopOptions::default()).await,
        Err(StackError::StackNotFound { .. })
    ));
}

#[tokio::test]
async fn test_operations_are_logged() {
    let fixture = Fixture::new(closed_port().await);
    let log_dir = TempDir::new().unwrap();
    let log_path = log_dir.path().join("operations.log");
    let runtime = Arc::new(MockRuntime::new());
    let ctl = fixture.controller(&runtime, Arc::new(NonInteractive)).with_operation_log(OperationLog::new(&log_path));

    ctl.start("dev", &StartOptions::default()).await.unwrap();
    ctl.start("citus", &StartOptions::default()).await.unwrap();
    ctl.stop("dev", &StopOptions::default()).await.unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("[INFO] start dev outcome=ready duration_ms="));
    assert!(lines[1].contains("[WARN] start citus outcome=conflict_blocked"));
    assert!(lines[2].contains("[INFO] stop dev outcome=stopped"));
}
