//! Container runtime adapter abstraction.
//!
//! Every read of, and every mutation to, the container runtime goes through the
//! `ContainerRuntime` trait. The runtime is the only source of truth about
//! which stacks are running; nothing here caches its answers.
//!
//! - `DockerCompose`: drives the `docker` (or compatible) CLI
//! - `MockRuntime`: in-memory runtime for tests

use crate::error::Result;
use crate::types::{BoundPort, ContainerSummary, StackDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Container runtime trait.
///
/// Methods are instrumented by implementations (not here) to maintain observability.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Confirm the runtime daemon answers.
    ///
    /// Fails with `RuntimeUnavailable` when it does not.
    async fn ping(&self) -> Result<()>;

    /// All containers (any state) of the stack's compose project.
    async fn containers(&self, stack: &StackDefinition) -> Result<Vec<ContainerSummary>>;

    /// Host ports currently published by any container on the runtime.
    async fn published_ports(&self) -> Result<Vec<BoundPort>>;

    /// Bring the bundle up detached, enabling the given profiles.
    async fn up(&self, stack: &StackDefinition, profiles: &[String]) -> Result<()>;

    /// Bring the bundle down.
    ///
    /// `force` skips the graceful stop period.
    async fn down(&self, stack: &StackDefinition, force: bool) -> Result<()>;

    /// Bring the bundle down and delete its volumes.
    async fn purge_volumes(&self, stack: &StackDefinition) -> Result<()>;

    /// Run a command in a live container of `service`.
    ///
    /// A non-zero exit is reported in the output, not as an error.
    async fn exec(&self, stack: &StackDefinition, service: &str, command: &[String]) -> Result<ExecOutput>;

    /// Stream service logs to the terminal until they end (or forever with `follow`).
    async fn logs(&self, stack: &StackDefinition, follow: bool, tail: Option<u32>) -> Result<()>;

    /// Runtime-wide object counts.
    async fn info(&self) -> Result<RuntimeInfo>;

    /// Runtime name (for logging).
    fn name(&self) -> &str;
}

/// Result of [`ContainerRuntime::exec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runtime-wide counts reported by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub containers: u64,
    pub containers_running: u64,
    pub containers_paused: u64,
    pub containers_stopped: u64,
    pub images: u64,
    /// `None` when the volume listing failed
    pub volumes: Option<u64>,
}

pub mod docker;
pub mod mock;
pub mod scanner;

pub use docker::DockerCompose;
pub use mock::{MockRuntime, RuntimeCall};
pub use scanner::{ListenerScanner, MockPortScanner, PortScanner};

mod factory;
pub use factory::AdapterFactory;
