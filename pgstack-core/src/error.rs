//! Error types for pgstack.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.
//! Conflicts and health timeouts are normally returned as structured outcomes;
//! the matching variants exist for callers that want to turn them into errors.

use crate::conflict::ConflictReport;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pgstack operations.
pub type Result<T> = std::result::Result<T, StackError>;

/// Main error type for pgstack.
#[derive(Error, Debug)]
pub enum StackError {
    // Catalog errors
    #[error("Unknown stack: {stack_id}")]
    StackNotFound { stack_id: String },

    #[error("Stack '{stack_id}' is defined more than once in the catalog")]
    DuplicateStack { stack_id: String },

    #[error("Invalid stack catalog: {reason}")]
    InvalidCatalog { reason: String },

    #[error("Cannot read service bundle for stack '{stack_id}' at {path:?}: {reason}")]
    BundleUnreadable { stack_id: String, path: PathBuf, reason: String },

    #[error("Compose parse error: {reason}")]
    ComposeParseError { reason: String },

    // Lifecycle errors
    #[error("Stack '{}' conflicts with running services: {}", .report.requested_stack_id, .report.summary())]
    Conflict { report: ConflictReport },

    #[error("Runtime failed to {action} stack '{stack_id}': {diagnostic}")]
    Provisioning { stack_id: String, action: String, diagnostic: String },

    #[error("Stack '{stack_id}' did not become healthy within {timeout_secs}s (waiting on: {})", .pending.join(", "))]
    HealthTimeout { stack_id: String, timeout_secs: u64, pending: Vec<String> },

    #[error("Container runtime unavailable: {reason}")]
    RuntimeUnavailable { reason: String },

    #[error("Restart of '{stack_id}' aborted because stop failed: {source}")]
    RestartAborted {
        stack_id: String,
        #[source]
        source: Box<StackError>,
    },

    #[error("Refusing to purge volumes of '{stack_id}' without confirmation")]
    CleanRefused { stack_id: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
