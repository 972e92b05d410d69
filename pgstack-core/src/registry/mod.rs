//! Stack registry.
//!
//! Static catalog of known stacks, loaded once at startup and validated up
//! front so that nothing downstream has to cope with a malformed definition.
//!
//! # Example
//!
//! ```ignore
//! use pgstack_core::registry::StackRegistry;
//!
//! let registry = StackRegistry::builtin(&pgstack_core::paths::project_root())?;
//! let dev = registry.lookup("dev")?;
//! println!("{} binds {:?}", dev.id, dev.declared_ports);
//! ```

mod builtin;

use crate::compose::ComposeParser;
use crate::config::Config;
use crate::error::{Result, StackError};
use crate::paths;
use crate::types::{ReadinessProbe, StackDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use builtin::BUILTIN_CATALOG;

/// On-disk catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub stacks: Vec<CatalogEntry>,
}

/// One stack as written in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,

    /// Compose file, relative to the catalog's base directory unless absolute
    pub bundle: PathBuf,

    /// Compose project name; `pgstack-<id>` when unset
    #[serde(default)]
    pub project: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub ports: Vec<u16>,

    #[serde(default)]
    pub profiles: Vec<String>,

    #[serde(default)]
    pub probes: Vec<ReadinessProbe>,
}

/// Ordered, validated catalog of stack definitions.
#[derive(Debug, Clone)]
pub struct StackRegistry {
    stacks: Vec<StackDefinition>,
}

impl StackRegistry {
    /// Load the registry the configuration points at.
    ///
    /// Uses `config.catalog_path` when set, otherwise the built-in catalog
    /// rooted at [`paths::project_root`].
    pub fn load(config: &Config) -> Result<Self> {
        match &config.catalog_path {
            Some(path) => Self::from_file(path),
            None => Self::builtin(&paths::project_root()),
        }
    }

    /// Load a catalog file; relative bundle paths resolve against its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        info!("Loading stack catalog from {:?}", path);
        let content = std::fs::read_to_string(path)
            .map_err(|e| StackError::Io { path: path.to_path_buf(), source: e })?;
        let base = path.parent().unwrap_or(Path::new("."));
        Self::from_yaml(&content, base)
    }

    /// Load the built-in catalog with bundles under `root`.
    pub fn builtin(root: &Path) -> Result<Self> {
        debug!("Loading built-in stack catalog rooted at {:?}", root);
        Self::from_yaml(BUILTIN_CATALOG, root)
    }

    /// Parse a catalog document and resolve every bundle it references.
    pub fn from_yaml(content: &str, base: &Path) -> Result<Self> {
        let catalog: Catalog = serde_yaml::from_str(content)
            .map_err(|e| StackError::InvalidCatalog { reason: e.to_string() })?;

        let stacks = catalog
            .stacks
            .into_iter()
            .map(|entry| Self::resolve_entry(entry, base))
            .collect::<Result<Vec<_>>>()?;

        Self::from_definitions(stacks)
    }

    /// Build a registry from already-resolved definitions.
    ///
    /// # Errors
    /// * `DuplicateStack` - two definitions share an id
    /// * `InvalidCatalog` - an id is empty, a port is 0, or a probe names an unknown service
    pub fn from_definitions(stacks: Vec<StackDefinition>) -> Result<Self> {
        let mut seen = HashSet::new();
        for stack in &stacks {
            if stack.id.trim().is_empty() {
                return Err(StackError::InvalidCatalog { reason: "stack id must not be empty".to_string() });
            }
            if !seen.insert(stack.id.as_str()) {
                return Err(StackError::DuplicateStack { stack_id: stack.id.clone() });
            }
            if stack.declared_ports.contains(&0) {
                return Err(StackError::InvalidCatalog {
                    reason: format!("stack '{}' declares port 0", stack.id),
                });
            }
            for probe in &stack.readiness_probes {
                if !stack.has_service(&probe.service) {
                    return Err(StackError::InvalidCatalog {
                        reason: format!(
                            "stack '{}' has a probe for unknown service '{}'",
                            stack.id, probe.service
                        ),
                    });
                }
            }
        }

        info!(count = stacks.len(), "Stack registry loaded");
        Ok(Self { stacks })
    }

    /// Look up a stack by id.
    pub fn lookup(&self, id: &str) -> Result<&StackDefinition> {
        self.stacks
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| StackError::StackNotFound { stack_id: id.to_string() })
    }

    /// All stacks in catalog order.
    pub fn all(&self) -> &[StackDefinition] {
        &self.stacks
    }

    /// Stacks (other than `id`) whose declared ports overlap `id`'s.
    pub fn overlapping(&self, id: &str) -> Result<Vec<&StackDefinition>> {
        let target = self.lookup(id)?;
        Ok(self
            .stacks
            .iter()
            .filter(|s| s.id != target.id && !s.overlapping_ports(target).is_empty())
            .collect())
    }

    fn resolve_entry(entry: CatalogEntry, base: &Path) -> Result<StackDefinition> {
        let bundle = if entry.bundle.is_absolute() { entry.bundle.clone() } else { base.join(&entry.bundle) };

        let compose = ComposeParser::parse_file(&bundle).map_err(|e| StackError::BundleUnreadable {
            stack_id: entry.id.clone(),
            path: bundle.clone(),
            reason: e.to_string(),
        })?;
        let services = ComposeParser::services(&compose);

        let declared_ports: BTreeSet<u16> = entry.ports.iter().copied().collect();
        for service in &services {
            for port in &service.published_ports {
                if !declared_ports.contains(port) {
                    warn!(
                        stack = %entry.id,
                        service = %service.name,
                        port,
                        "Bundle publishes a port the catalog does not declare"
                    );
                }
            }
        }

        for profile in &entry.profiles {
            if !services.iter().any(|s| s.profiles.contains(profile)) {
                warn!(stack = %entry.id, profile = %profile, "No service in the bundle uses this profile");
            }
        }

        let project = entry.project.unwrap_or_else(|| format!("pgstack-{}", entry.id));

        Ok(StackDefinition {
            id: entry.id,
            project,
            bundle,
            declared_ports,
            description: entry.description,
            optional_profiles: entry.profiles,
            readiness_probes: entry.probes,
            services,
        })
    }
}
