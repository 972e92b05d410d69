//! Docker Compose file parser.
//!
//! Parses compose files into the service list a stack definition needs.

use super::types::*;
use crate::error::{Result, StackError};
use crate::types::BundleService;
use std::path::Path;
use tracing::{debug, instrument};

/// Parser for compose files.
pub struct ComposeParser;

impl ComposeParser {
    /// Parse a compose file from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML is invalid
    /// - The compose version is unsupported
    /// - No services are defined
    #[instrument(skip(content))]
    pub fn parse(content: &str) -> Result<ComposeFile> {
        let compose: ComposeFile = serde_yaml::from_str(content)
            .map_err(|e| StackError::ComposeParseError { reason: e.to_string() })?;

        Self::validate_version(&compose.version)?;

        if compose.services.is_empty() {
            return Err(StackError::ComposeParseError { reason: "No services defined".to_string() });
        }

        for (name, service) in &compose.services {
            if service.image.is_none() && service.build.is_none() {
                return Err(StackError::ComposeParseError {
                    reason: format!("Service '{}' has neither image nor build", name),
                });
            }
        }

        Ok(compose)
    }

    /// Parse a compose file from a file path.
    #[instrument]
    pub fn parse_file<P: AsRef<Path> + std::fmt::Debug>(path: P) -> Result<ComposeFile> {
        let path = path.as_ref();
        debug!("Reading compose file from {:?}", path);

        let content = std::fs::read_to_string(path)
            .map_err(|e| StackError::Io { path: path.to_path_buf(), source: e })?;

        Self::parse(&content)
    }

    /// Flatten a parsed compose file into bundle services.
    pub fn services(compose: &ComposeFile) -> Vec<BundleService> {
        compose
            .services
            .iter()
            .map(|(name, service)| BundleService {
                name: name.clone(),
                profiles: service.profiles.clone(),
                published_ports: service.ports.iter().flat_map(Self::published_ports).collect(),
            })
            .collect()
    }

    /// Host ports published by one `ports` entry.
    ///
    /// Entries without a fixed host port (ephemeral publishing) yield nothing.
    pub fn published_ports(entry: &PortEntry) -> Vec<u16> {
        match entry {
            PortEntry::Number(_) => Vec::new(),
            PortEntry::Short(spec) => {
                let spec = interpolate(spec);
                let spec = spec.split('/').next().unwrap_or_default();

                // Strip a bracketed IPv6 host address
                let spec = match spec.strip_prefix('[') {
                    Some(rest) => rest.split_once("]:").map(|(_, r)| r).unwrap_or(rest),
                    None => spec,
                };

                let parts: Vec<&str> = spec.split(':').collect();
                let host = match parts.len() {
                    2 => parts[0],
                    3 => parts[1],
                    _ => return Vec::new(),
                };
                parse_port_range(host)
            }
            PortEntry::Long { published, .. } => match published {
                Some(serde_yaml::Value::Number(n)) => {
                    n.as_u64().and_then(|p| u16::try_from(p).ok()).into_iter().collect()
                }
                Some(serde_yaml::Value::String(s)) => parse_port_range(&interpolate(s)),
                _ => Vec::new(),
            },
        }
    }

    /// Supports compose file format versions 2 and 3, or no version at all.
    fn validate_version(version: &str) -> Result<()> {
        if version.is_empty() || version.starts_with('2') || version.starts_with('3') {
            Ok(())
        } else {
            Err(StackError::ComposeParseError {
                reason: format!("Unsupported compose version: {}", version),
            })
        }
    }
}

/// Parse "5432" or "5432-5435" into the listed ports.
fn parse_port_range(s: &str) -> Vec<u16> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }
    match s.split_once('-') {
        Some((start, end)) => match (start.parse::<u16>(), end.parse::<u16>()) {
            (Ok(start), Ok(end)) if start <= end => (start..=end).collect(),
            _ => Vec::new(),
        },
        None => s.parse::<u16>().ok().filter(|p| *p != 0).into_iter().collect(),
    }
}

/// Resolve `${VAR}`, `${VAR:-default}` and `${VAR-default}` against the environment.
///
/// Compose resolves these the same way at `up` time, so the ports read here
/// are the ones the runtime will publish.
fn interpolate(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let expr = &after[..end];
        let (name, default, empty_is_unset) = if let Some((n, d)) = expr.split_once(":-") {
            (n, Some(d), true)
        } else if let Some((n, d)) = expr.split_once('-') {
            (n, Some(d), false)
        } else {
            (expr, None, false)
        };

        let value = match std::env::var(name) {
            Ok(v) if !(empty_is_unset && v.is_empty()) => v,
            _ => default.unwrap_or_default().to_string(),
        };
        out.push_str(&value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_version() {
        assert!(ComposeParser::validate_version("").is_ok());
        assert!(ComposeParser::validate_version("2.1").is_ok());
        assert!(ComposeParser::validate_version("3.8").is_ok());
        assert!(ComposeParser::validate_version("1").is_err());
    }

    #[test]
    fn test_parse_port_range() {
        assert_eq!(parse_port_range("5432"), vec![5432]);
        assert_eq!(parse_port_range("5432-5435"), vec![5432, 5433, 5434, 5435]);
        assert!(parse_port_range("5435-5432").is_empty());
        assert!(parse_port_range("0").is_empty());
        assert!(parse_port_range("abc").is_empty());
    }

    #[test]
    fn test_interpolate_defaults() {
        assert_eq!(interpolate("${PGSTACK_TEST_UNSET_PORT:-6432}:6432"), "6432:6432");
        assert_eq!(interpolate("${PGSTACK_TEST_UNSET_PORT-7000}"), "7000");
        assert_eq!(interpolate("plain"), "plain");
        assert_eq!(interpolate("${UNTERMINATED"), "${UNTERMINATED");
    }
}
