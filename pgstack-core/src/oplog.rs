//! Append-only operation log.
//!
//! One line per lifecycle operation, for humans reading after the fact.
//! Control logic never reads it back, and a failed write never fails the
//! operation being recorded.

use chrono::{SecondsFormat, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Log line severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Writer for the operation log file.
#[derive(Debug, Clone)]
pub struct OperationLog {
    path: Option<PathBuf>,
}

impl OperationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: Some(path.into()) }
    }

    /// A log that records nothing.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Append `[ts] [LEVEL] <operation> <stack> <detail>`.
    pub fn record(&self, level: LogLevel, operation: &str, stack_id: &str, detail: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let line = format_line(&timestamp, level, operation, stack_id, detail);
        if let Err(e) = append(path, &line) {
            warn!(path = %path.display(), error = %e, "Cannot write operation log");
        }
    }
}

fn format_line(timestamp: &str, level: LogLevel, operation: &str, stack_id: &str, detail: &str) -> String {
    if detail.is_empty() {
        format!("[{}] [{}] {} {}\n", timestamp, level, operation, stack_id)
    } else {
        format!("[{}] [{}] {} {} {}\n", timestamp, level, operation, stack_id, detail)
    }
}

fn append(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_line() {
        assert_eq!(
            format_line("2026-01-01T12:00:00Z", LogLevel::Info, "start", "dev", "outcome=ready duration_ms=8123"),
            "[2026-01-01T12:00:00Z] [INFO] start dev outcome=ready duration_ms=8123\n"
        );
        assert_eq!(format_line("t", LogLevel::Error, "stop", "citus", ""), "[t] [ERROR] stop citus\n");
    }

    #[test]
    fn test_record_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("operations.log");
        let log = OperationLog::new(&path);

        log.record(LogLevel::Info, "start", "dev", "outcome=ready");
        log.record(LogLevel::Warn, "start", "citus", "outcome=conflict_blocked");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[INFO] start dev outcome=ready"));
        assert!(lines[1].contains("[WARN] start citus"));
    }

    #[test]
    fn test_unwritable_path_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "").unwrap();
        // Parent is a regular file, so the directory cannot be created
        OperationLog::new(file.join("operations.log")).record(LogLevel::Info, "stop", "dev", "");
        OperationLog::disabled().record(LogLevel::Info, "stop", "dev", "");
    }
}
