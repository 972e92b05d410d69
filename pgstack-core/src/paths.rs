//! Centralized path configuration for pgstack.
//!
//! All data paths should go through this module so that the CLI, the
//! operation log and the catalog loader agree on locations.

use std::path::PathBuf;

/// Get the pgstack data directory.
///
/// Resolution order:
/// 1. `PGSTACK_DATA_DIR` environment variable
/// 2. `~/.pgstack`
/// 3. `/tmp/pgstack` when no home directory can be determined
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PGSTACK_DATA_DIR") {
        return PathBuf::from(dir);
    }

    dirs::home_dir().map(|h| h.join(".pgstack")).unwrap_or_else(|| PathBuf::from("/tmp/pgstack"))
}

/// Get the configuration directory.
///
/// `PGSTACK_CONFIG_DIR` wins, otherwise the data directory is reused.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PGSTACK_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    data_dir()
}

/// Get the logs directory.
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Get the append-only operation log path.
pub fn operation_log_path() -> PathBuf {
    logs_dir().join("operations.log")
}

/// Root against which relative bundle paths of the built-in catalog are resolved.
///
/// `PGSTACK_ROOT` if set, else the current directory.
pub fn project_root() -> PathBuf {
    if let Ok(dir) = std::env::var("PGSTACK_ROOT") {
        return PathBuf::from(dir);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_consistency() {
        let base = data_dir();
        assert!(logs_dir().starts_with(&base));
        assert!(operation_log_path().starts_with(logs_dir()));
        assert_eq!(operation_log_path().file_name().unwrap(), "operations.log");
    }
}
