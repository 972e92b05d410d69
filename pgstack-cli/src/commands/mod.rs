//! CLI command implementations

pub mod interactive;
pub mod lifecycle;
pub mod logs;
pub mod prompt;
pub mod status;

use anyhow::{Context as _, Result};
use indicatif::{ProgressBar, ProgressStyle};
use pgstack_core::adapters::DockerCompose;
use pgstack_core::{
    AdapterFactory, Config, ContainerRuntime, LifecycleController, LifecycleSettings, ListenerScanner, OperationLog,
    ResourceMonitor, StackError, StackRegistry,
};
use prompt::TerminalOperator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Process exit codes.
pub mod exit {
    pub const OK: u8 = 0;
    pub const TIMED_OUT: u8 = 1;
    pub const CONFLICT: u8 = 2;
    pub const PROVISIONING: u8 = 3;
    pub const RUNTIME_UNAVAILABLE: u8 = 4;
    pub const REFUSED: u8 = 5;
    pub const INVALID: u8 = 6;
}

/// Per-invocation overrides shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub catalog: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub assume_yes: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(catalog) = &self.catalog {
            config.catalog_path = Some(catalog.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config.health_timeout_secs = secs;
        }
        if let Some(ms) = self.poll_interval_ms.filter(|ms| *ms > 0) {
            config.poll_interval_ms = ms;
        }
    }
}

/// Everything a command needs, built fresh for each invocation.
pub struct Context {
    pub config: Config,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub controller: LifecycleController,
    pub monitor: ResourceMonitor,
    pub operator: Arc<TerminalOperator>,
}

impl Context {
    /// Load the registry and wire the components together.
    ///
    /// With `require_runtime` unset, a missing runtime binary is tolerated so
    /// read-only commands can still report every stack as unknown.
    pub fn build(
        config: Config,
        overrides: &Overrides,
        cancel: CancellationToken,
        require_runtime: bool,
    ) -> Result<Self> {
        let registry = Arc::new(StackRegistry::load(&config).context("Failed to load stack catalog")?);

        let runtime = match AdapterFactory::create(&config) {
            Ok(runtime) => runtime,
            Err(e) if !require_runtime => {
                warn!(error = %e, "Continuing without a usable runtime");
                Arc::new(DockerCompose::new(&config.docker_binary)) as Arc<dyn ContainerRuntime>
            }
            Err(e) => return Err(e.into()),
        };

        let operator = Arc::new(TerminalOperator::new(overrides.assume_yes));
        let controller = LifecycleController::new(
            registry,
            runtime.clone(),
            Arc::new(ListenerScanner),
            operator.clone(),
            LifecycleSettings::from_config(&config),
        )
        .with_operation_log(OperationLog::new(&config.operation_log_path))
        .with_cancellation(cancel);

        let monitor = ResourceMonitor::new(runtime.clone(), pgstack_core::paths::data_dir());

        Ok(Self { config, runtime, controller, monitor, operator })
    }
}

/// Exit code for an error that aborted a command.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<StackError>() {
        Some(e) => exit_code_for_stack_error(e),
        None => exit::INVALID,
    }
}

fn exit_code_for_stack_error(err: &StackError) -> u8 {
    match err {
        StackError::Conflict { .. } => exit::CONFLICT,
        StackError::HealthTimeout { .. } => exit::TIMED_OUT,
        StackError::Provisioning { .. } => exit::PROVISIONING,
        StackError::RuntimeUnavailable { .. } => exit::RUNTIME_UNAVAILABLE,
        StackError::CleanRefused { .. } => exit::REFUSED,
        StackError::RestartAborted { source, .. } => match source.as_ref() {
            StackError::RuntimeUnavailable { .. } => exit::RUNTIME_UNAVAILABLE,
            _ => exit::PROVISIONING,
        },
        _ => exit::INVALID,
    }
}

/// Steady spinner with the house style.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"]))
    {
        spinner.set_style(style);
    }
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
