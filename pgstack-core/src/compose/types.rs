//! Docker Compose file format types.
//!
//! Only the parts of a compose file the lifecycle manager reads:
//! service names, profiles and published ports. Everything else in the file
//! is passed to the runtime untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root structure of a compose file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Compose file format version (e.g., "2", "3", "3.8"); obsolete but still common
    #[serde(default)]
    pub version: String,

    /// Services, ordered by name
    pub services: BTreeMap<String, Service>,

    /// Named volumes
    #[serde(default)]
    pub volumes: BTreeMap<String, serde_yaml::Value>,
}

/// A service in a compose file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Service {
    /// Container image to use
    #[serde(default)]
    pub image: Option<String>,

    /// Build context, for services built locally
    #[serde(default)]
    pub build: Option<serde_yaml::Value>,

    /// Explicit container name
    #[serde(default)]
    pub container_name: Option<String>,

    /// Profiles that gate this service
    #[serde(default)]
    pub profiles: Vec<String>,

    /// Port mappings in short ("5432:5432") or long form
    #[serde(default)]
    pub ports: Vec<PortEntry>,
}

/// One entry of a service's `ports` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    /// `"HOST:CONTAINER"`, `"IP:HOST:CONTAINER/proto"`, ...
    Short(String),

    /// Bare container port (`- 5432`), published on an ephemeral host port
    Number(u32),

    /// Long syntax (`target`, `published`, ...)
    Long {
        target: u32,
        #[serde(default)]
        published: Option<serde_yaml::Value>,
        #[serde(default)]
        host_ip: Option<String>,
        #[serde(default)]
        protocol: Option<String>,
    },
}
