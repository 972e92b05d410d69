//! Tracing setup.
//!
//! Diagnostics go to stderr so stdout carries only command output (tables,
//! JSON). `RUST_LOG` wins over the configured level when set.

use crate::error::{Result, StackError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level for a configured base level raised by `-v` flags.
pub fn effective_level(configured: &str, verbosity: u8) -> &str {
    match verbosity {
        0 => configured,
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize the global subscriber.
///
/// Must be called once, before any other operation.
pub fn init(configured_level: &str, verbosity: u8) -> Result<()> {
    let level = effective_level(configured_level, verbosity);
    let filter = if verbosity == 0 {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))
    } else {
        EnvFilter::try_new(level)
    }
    .map_err(|e| StackError::InvalidConfig { reason: format!("invalid log level '{}': {}", level, e) })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(verbosity > 1).with_level(true))
        .try_init()
        .map_err(|e| StackError::Other(anyhow::anyhow!("tracing already initialized: {}", e)))?;

    tracing::debug!(level, "Observability initialized");
    Ok(())
}
