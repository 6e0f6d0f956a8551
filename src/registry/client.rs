//! Registry client boundary.
//!
//! The cache layer never talks to a registry server directly; it calls a
//! [`RegistryClient`]. Transport, encoding and authentication live behind it.

use async_trait::async_trait;

use crate::registry::types::{MicroserviceCacheKey, MicroserviceInstance, RegistryResult};

/// Instances found for a key, with the registry's revision marker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstancesSnapshot {
    pub instances: Vec<MicroserviceInstance>,
    pub revision: Option<String>,
}

impl InstancesSnapshot {
    pub fn new(instances: Vec<MicroserviceInstance>, revision: impl Into<String>) -> Self {
        Self {
            instances,
            revision: Some(revision.into()),
        }
    }
}

/// Answer of a registry lookup that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The service exists; here is its current instance set.
    Found(InstancesSnapshot),
    /// The service no longer exists in the registry.
    NotFound,
}

/// Source of instance data for the cache layer.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the instances matching the key's app, service and version rule.
    ///
    /// Transport or decode problems are reported as `Err`; an authoritative
    /// "no such service" is `Ok(FetchOutcome::NotFound)`.
    async fn fetch_instances(&self, key: &MicroserviceCacheKey) -> RegistryResult<FetchOutcome>;
}
