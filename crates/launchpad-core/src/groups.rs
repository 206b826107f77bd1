//! Service groups as stored in the services document
//!
//! ```json
//! { "groups": { "<group id>": { "name": "Backend", "env": { "ASPNETCORE_ENVIRONMENT": "Development" },
//!     "services": { "<service id>": { "name": "api", "path": "/srv/api", "type": "dotnet" } } } } }
//! ```
//!
//! Loading and saving the document belongs to the caller; this module only
//! parses it and flattens groups into per-service configs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ServiceConfig, ServiceEnv};

/// Group of services sharing inherited environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub env: ServiceEnv,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
}

/// Top-level services document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesDocument {
    #[serde(default)]
    pub groups: HashMap<String, GroupConfig>,
}

impl ServicesDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Every service of every group, keyed by service id
    pub fn resolve(&self) -> HashMap<String, ResolvedService> {
        resolve_groups(&self.groups)
    }
}

/// A service config together with the environment its group passes down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub group_id: String,
    pub config: ServiceConfig,
    pub inherited_env: ServiceEnv,
}

/// Flatten groups into `service id -> (config, inherited env)`
pub fn resolve_groups(groups: &HashMap<String, GroupConfig>) -> HashMap<String, ResolvedService> {
    groups
        .iter()
        .flat_map(|(group_id, group)| {
            group.services.iter().map(move |(service_id, config)| {
                (
                    service_id.clone(),
                    ResolvedService {
                        group_id: group_id.clone(),
                        config: config.clone(),
                        inherited_env: group.env.clone(),
                    },
                )
            })
        })
        .collect()
}
