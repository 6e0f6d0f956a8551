//! Local registry backed by a definition file.
//!
//! Lets a consumer resolve services without a registry server, for local
//! development and tests. Services can also be registered at runtime; every
//! mutation bumps the revision of the touched service.
//!
//! ```toml
//! [[services.orders]]
//! app_id = "shop"
//! version = "1.0.0"
//!
//! [[services.orders.instances]]
//! endpoints = ["rest://127.0.0.1:8080"]
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::{ConfigError, LocalRegistryConfig};
use crate::registry::client::{FetchOutcome, InstancesSnapshot, RegistryClient};
use crate::registry::types::{MicroserviceCacheKey, MicroserviceInstance, RegistryResult};

/// Application used when a definition omits `app_id`.
pub const DEFAULT_APP_ID: &str = "default";

#[derive(Debug, Deserialize)]
struct LocalRegistryFile {
    #[serde(default)]
    services: HashMap<String, Vec<ServiceDefinition>>,
}

#[derive(Debug, Deserialize)]
struct ServiceDefinition {
    app_id: Option<String>,
    #[serde(default = "default_version")]
    version: String,
    id: Option<String>,
    #[serde(default)]
    instances: Vec<InstanceDefinition>,
}

#[derive(Debug, Deserialize)]
struct InstanceDefinition {
    endpoints: Vec<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Default)]
struct ServiceGroup {
    revision: u64,
    versions: Vec<ServiceVersion>,
}

#[derive(Debug)]
struct ServiceVersion {
    service_id: String,
    version: String,
    instances: Vec<MicroserviceInstance>,
}

/// In-process registry. Version rules are not evaluated: every version of a
/// service is returned.
#[derive(Debug, Default)]
pub struct LocalRegistryClient {
    services: DashMap<(String, String), ServiceGroup>,
}

impl LocalRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load service definitions from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let registry = Self::from_toml_str(&content)?;
        tracing::info!(path = ?path, services = registry.services.len(), "Loaded local registry");
        Ok(registry)
    }

    /// Load the file named by the `local_registry` config section.
    pub fn from_config(config: &LocalRegistryConfig) -> Result<Self, ConfigError> {
        Self::load(Path::new(&config.path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: LocalRegistryFile = toml::from_str(content)?;
        let registry = Self::new();

        for (name, definitions) in file.services {
            for definition in definitions {
                let app_id = definition
                    .app_id
                    .filter(|app| !app.is_empty())
                    .unwrap_or_else(|| DEFAULT_APP_ID.to_string());
                let service_id = definition.id.unwrap_or_else(|| Uuid::new_v4().to_string());

                let mut group = registry.services.entry((app_id, name.clone())).or_default();
                let instances = definition
                    .instances
                    .into_iter()
                    .map(|i| MicroserviceInstance::new(Uuid::new_v4().to_string(), service_id.clone(), i.endpoints))
                    .collect();
                group.versions.push(ServiceVersion {
                    service_id,
                    version: definition.version,
                    instances,
                });
                group.revision += 1;
            }
        }
        Ok(registry)
    }

    /// Add an instance, creating the service version if needed.
    pub fn register_instance(
        &self,
        app_id: &str,
        service_name: &str,
        version: &str,
        endpoints: Vec<String>,
    ) -> MicroserviceInstance {
        let mut group = self
            .services
            .entry((app_id.to_string(), service_name.to_string()))
            .or_default();

        let index = match group.versions.iter().position(|v| v.version == version) {
            Some(index) => index,
            None => {
                group.versions.push(ServiceVersion {
                    service_id: Uuid::new_v4().to_string(),
                    version: version.to_string(),
                    instances: Vec::new(),
                });
                group.versions.len() - 1
            }
        };

        let target = &mut group.versions[index];
        let instance = MicroserviceInstance::new(Uuid::new_v4().to_string(), target.service_id.clone(), endpoints);
        target.instances.push(instance.clone());
        group.revision += 1;
        instance
    }

    /// Remove one instance. Returns `false` if it was not registered.
    pub fn unregister_instance(&self, app_id: &str, service_name: &str, instance_id: &str) -> bool {
        let Some(mut group) = self.services.get_mut(&(app_id.to_string(), service_name.to_string())) else {
            return false;
        };

        let mut removed = false;
        for version in group.versions.iter_mut() {
            let before = version.instances.len();
            version.instances.retain(|i| i.instance_id != instance_id);
            removed |= version.instances.len() != before;
        }
        if removed {
            group.revision += 1;
        }
        removed
    }

    /// Remove a service and all of its versions.
    pub fn remove_service(&self, app_id: &str, service_name: &str) -> bool {
        self.services
            .remove(&(app_id.to_string(), service_name.to_string()))
            .is_some()
    }
}

#[async_trait]
impl RegistryClient for LocalRegistryClient {
    async fn fetch_instances(&self, key: &MicroserviceCacheKey) -> RegistryResult<FetchOutcome> {
        let lookup = (key.app_id().to_string(), key.service_name().to_string());
        let Some(group) = self.services.get(&lookup) else {
            return Ok(FetchOutcome::NotFound);
        };

        let instances = group
            .versions
            .iter()
            .flat_map(|v| v.instances.iter().cloned())
            .collect();
        Ok(FetchOutcome::Found(InstancesSnapshot::new(
            instances,
            group.revision.to_string(),
        )))
    }
}
