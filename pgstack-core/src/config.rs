//! Configuration management.

use crate::error::{Result, StackError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Persistent configuration for pgstack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Container runtime CLI used for every runtime call.
    pub docker_binary: String,
    /// Global health gate deadline.
    pub health_timeout_secs: u64,
    /// Fixed delay between probe attempts.
    pub poll_interval_ms: u64,
    /// Upper bound for one probe attempt.
    pub probe_attempt_timeout_ms: u64,
    pub log_level: String,
    /// Stack catalog file; the built-in catalog is used when unset.
    pub catalog_path: Option<PathBuf>,
    pub operation_log_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            health_timeout_secs: 60,
            poll_interval_ms: 2000,
            probe_attempt_timeout_ms: 3000,
            log_level: "info".to_string(),
            catalog_path: None,
            operation_log_path: paths::operation_log_path(),
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_dir().join("config.json")
    }

    /// Load configuration from disk, falling back to defaults when no file exists.
    ///
    /// `PGSTACK_CATALOG` overrides the catalog entry of the file.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Ok(catalog) = std::env::var("PGSTACK_CATALOG") {
            config.catalog_path = Some(PathBuf::from(catalog));
        }
        Ok(config)
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| StackError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| StackError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(StackError::InvalidConfig {
                reason: "poll_interval_ms must be greater than zero".to_string(),
            });
        }
        if self.docker_binary.trim().is_empty() {
            return Err(StackError::InvalidConfig {
                reason: "docker_binary must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_attempt_timeout_ms)
    }
}
