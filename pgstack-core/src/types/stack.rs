//! Stack domain types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// A named, mutually exclusive deployment topology.
///
/// Built once by the registry from the catalog and the service bundle it
/// references; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDefinition {
    /// Unique key (e.g. "dev", "citus")
    pub id: String,

    /// Compose project name the runtime groups this stack's containers under
    pub project: String,

    /// Path to the declarative service bundle (compose file)
    pub bundle: PathBuf,

    /// Host-facing ports this stack binds
    pub declared_ports: BTreeSet<u16>,

    /// Human description
    pub description: String,

    /// Profiles that may be requested on start (e.g. "tools")
    pub optional_profiles: Vec<String>,

    /// Readiness probes, in catalog order
    pub readiness_probes: Vec<ReadinessProbe>,

    /// Services found in the bundle
    pub services: Vec<BundleService>,
}

impl StackDefinition {
    /// Services that must be live for the stack to count as running.
    ///
    /// Profile-gated services are never required because whether a profile was
    /// requested is not recorded anywhere.
    pub fn required_services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().filter(|s| s.profiles.is_empty()).map(|s| s.name.as_str())
    }

    /// Whether `service` is part of this stack's bundle.
    pub fn has_service(&self, service: &str) -> bool {
        self.services.iter().any(|s| s.name == service)
    }

    /// Whether the stack declares `port`.
    pub fn declares_port(&self, port: u16) -> bool {
        self.declared_ports.contains(&port)
    }

    /// Declared ports shared with another stack.
    pub fn overlapping_ports(&self, other: &StackDefinition) -> BTreeSet<u16> {
        self.declared_ports.intersection(&other.declared_ports).copied().collect()
    }
}

/// A service entry read from a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleService {
    pub name: String,

    /// Compose profiles gating this service; empty means always started
    #[serde(default)]
    pub profiles: Vec<String>,

    /// Host ports the bundle publishes for this service
    #[serde(default)]
    pub published_ports: Vec<u16>,
}

/// Readiness probe for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessProbe {
    /// Service the probe speaks for
    pub service: String,

    #[serde(flatten)]
    pub kind: ProbeKind,

    /// Required probes gate readiness; optional ones only degrade it
    #[serde(default = "default_required")]
    pub required: bool,

    /// Attempt budget for optional probes (unbounded until the deadline when unset)
    #[serde(default)]
    pub retries: Option<u32>,
}

fn default_required() -> bool {
    true
}

/// How a readiness probe is issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeKind {
    /// HTTP GET; passes on `expect_status`, or any 2xx when unset
    Http {
        url: String,
        #[serde(default)]
        expect_status: Option<u16>,
    },

    /// TCP connect
    Tcp { host: String, port: u16 },

    /// Command executed inside the service container; passes on exit 0
    Exec { command: Vec<String> },
}

impl ProbeKind {
    /// Short human description of the probe target.
    pub fn target(&self) -> String {
        match self {
            Self::Http { url, .. } => url.clone(),
            Self::Tcp { host, port } => format!("{}:{}", host, port),
            Self::Exec { command } => command.join(" "),
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http { .. } => write!(f, "http"),
            Self::Tcp { .. } => write!(f, "tcp"),
            Self::Exec { .. } => write!(f, "exec"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(id: &str, ports: &[u16]) -> StackDefinition {
        StackDefinition {
            id: id.to_string(),
            project: format!("pgstack-{}", id),
            bundle: PathBuf::from("docker-compose.yml"),
            declared_ports: ports.iter().copied().collect(),
            description: String::new(),
            optional_profiles: vec!["tools".to_string()],
            readiness_probes: vec![],
            services: vec![
                BundleService { name: "postgres".to_string(), profiles: vec![], published_ports: vec![5432] },
                BundleService {
                    name: "pgadmin".to_string(),
                    profiles: vec!["tools".to_string()],
                    published_ports: vec![5050],
                },
            ],
        }
    }

    #[test]
    fn test_required_services_skip_profiles() {
        let dev = stack("dev", &[5432]);
        assert_eq!(dev.required_services().collect::<Vec<_>>(), vec!["postgres"]);
        assert!(dev.has_service("pgadmin"));
    }

    #[test]
    fn test_overlapping_ports() {
        let dev = stack("dev", &[5432, 5050]);
        let citus = stack("citus", &[5432, 5433, 5434, 5435]);
        assert_eq!(dev.overlapping_ports(&citus), [5432].into_iter().collect());
        assert_eq!(citus.overlapping_ports(&dev), [5432].into_iter().collect());
    }

    #[test]
    fn test_probe_deserialize() {
        let yaml = r#"
- service: postgres
  kind: exec
  command: ["pg_isready", "-U", "postgres"]
- service: haproxy
  kind: http
  url: http://localhost:7000/
  required: false
  retries: 3
- service: etcd
  kind: tcp
  host: 127.0.0.1
  port: 2379
"#;
        let probes: Vec<ReadinessProbe> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(probes.len(), 3);
        assert!(probes[0].required);
        assert_eq!(probes[0].kind.target(), "pg_isready -U postgres");
        assert!(!probes[1].required);
        assert_eq!(probes[1].retries, Some(3));
        assert_eq!(probes[2].kind, ProbeKind::Tcp { host: "127.0.0.1".to_string(), port: 2379 });
        assert_eq!(probes[2].kind.to_string(), "tcp");
    }
}
