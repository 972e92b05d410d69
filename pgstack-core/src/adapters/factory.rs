//! Adapter factory.
//!
//! Resolves the configured runtime CLI and hands back a shared adapter.

use crate::adapters::{ContainerRuntime, DockerCompose};
use crate::config::Config;
use crate::error::{Result, StackError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument};

/// Factory for creating container runtime adapters.
pub struct AdapterFactory;

impl AdapterFactory {
    /// Create the runtime adapter described by `config`.
    ///
    /// `config.docker_binary` may be a bare name (looked up on `PATH`) or a path.
    ///
    /// # Errors
    ///
    /// `RuntimeUnavailable` when the binary cannot be found.
    #[instrument(skip(config), fields(binary = %config.docker_binary))]
    pub fn create(config: &Config) -> Result<Arc<dyn ContainerRuntime>> {
        let binary = Self::find_binary(&config.docker_binary)?;
        let adapter = DockerCompose::new(&binary);
        info!(adapter = adapter.name(), binary = %binary.display(), "Created runtime adapter");
        Ok(Arc::new(adapter))
    }

    /// Find the runtime CLI.
    fn find_binary(name: &str) -> Result<PathBuf> {
        let candidate = Path::new(name);
        if candidate.components().count() > 1 {
            if candidate.is_file() {
                return Ok(candidate.to_path_buf());
            }
        } else if let Some(paths) = std::env::var_os("PATH") {
            if let Some(found) = std::env::split_paths(&paths).map(|dir| dir.join(name)).find(|p| p.is_file()) {
                return Ok(found);
            }
        }

        Err(StackError::RuntimeUnavailable {
            reason: format!("'{}' not found; is the container runtime installed?", name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_binary() {
        let config = Config { docker_binary: "pgstack-no-such-runtime".to_string(), ..Config::default() };
        assert!(matches!(AdapterFactory::create(&config), Err(StackError::RuntimeUnavailable { .. })));
    }

    #[test]
    fn test_explicit_path() {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("docker");
        std::fs::write(&binary, "#!/bin/sh\n").unwrap();

        let config = Config { docker_binary: binary.to_string_lossy().to_string(), ..Config::default() };
        let runtime = AdapterFactory::create(&config).unwrap();
        assert_eq!(runtime.name(), "docker-compose");
    }
}
