//! Service-level server selection.
//!
//! # Responsibilities
//! - Resolve a key to its cached instances
//! - Skip instances that are down, endpoint-less or isolated
//! - Let at most one probe through to an isolated server
//! - Feed invocation outcomes back into per-instance statistics

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use thiserror::Error;

use crate::clock::Clock;
use crate::config::DiscoveryConfig;
use crate::health::{Availability, InvocationId, IsolationFilter, ServerStatsTracker, TryingChanceCoordinator};
use crate::load_balancer::{rule_for, LoadBalanceRule};
use crate::registry::{MicroserviceCacheEntry, MicroserviceCacheKey, MicroserviceInstance, RegistryCacheStore, RegistryError};

#[derive(Debug, Error)]
pub enum BalancerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("no available server for {0}")]
    NoAvailableServer(String),
}

/// The server picked for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub instance: MicroserviceInstance,
    pub endpoint: String,
    pub invocation: InvocationId,
    /// The server is isolated and this invocation is its recovery probe.
    pub probe: bool,
}

#[derive(Debug)]
pub struct ServiceLoadBalancer {
    store: Arc<RegistryCacheStore>,
    tracker: Arc<ServerStatsTracker>,
    filter: IsolationFilter,
    rule: Box<dyn LoadBalanceRule>,
}

impl ServiceLoadBalancer {
    /// Create a balancer over `store`.
    ///
    /// Installs itself as the store's cache watcher to drop statistics of
    /// instances that disappear, replacing any watcher set before.
    pub fn new(
        store: Arc<RegistryCacheStore>,
        tracker: Arc<ServerStatsTracker>,
        filter: IsolationFilter,
        rule: Box<dyn LoadBalanceRule>,
    ) -> Self {
        watch_store(&store, &tracker);
        Self {
            store,
            tracker,
            filter,
            rule,
        }
    }

    /// Assemble tracker, coordinator, filter and rule from configuration.
    pub fn from_config(config: &DiscoveryConfig, store: Arc<RegistryCacheStore>, clock: Arc<dyn Clock>) -> Self {
        let coordinator = Arc::new(TryingChanceCoordinator::new(clock.clone(), config.trying_chance.ttl_ms));
        let tracker = Arc::new(ServerStatsTracker::new(
            clock.clone(),
            config.server_stats.window_ms,
            coordinator.clone(),
        ));
        let filter = IsolationFilter::new(config.isolation.clone(), clock, coordinator);
        Self::new(store, tracker, filter, rule_for(config.load_balancer.rule))
    }

    pub fn store(&self) -> &Arc<RegistryCacheStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<ServerStatsTracker> {
        &self.tracker
    }

    pub fn coordinator(&self) -> &Arc<TryingChanceCoordinator> {
        self.filter.coordinator()
    }

    /// Pick a server of `key` for `invocation`.
    pub async fn choose(&self, key: &MicroserviceCacheKey, invocation: InvocationId) -> Result<Selection, BalancerError> {
        let entry = self.store.find_service_cache(key).await?;
        let instances = entry.instances();

        let mut candidates = Vec::with_capacity(instances.len());
        for instance in instances.iter().filter(|i| i.is_up() && !i.endpoints.is_empty()) {
            let stats = self.tracker.stats_for(&instance.instance_id);
            match self.filter.check(&stats, invocation) {
                Availability::Available => candidates.push(instance.clone()),
                Availability::Probe => return Ok(selection(instance, invocation, true)),
                Availability::Isolated => {
                    tracing::debug!(instance_id = %instance.instance_id, "Skipping isolated server");
                }
            }
        }

        match self.rule.next_server(&candidates) {
            Some(instance) => Ok(selection(instance, invocation, false)),
            None => {
                tracing::warn!(key = %key, instances = instances.len(), "No available server");
                Err(BalancerError::NoAvailableServer(key.to_string()))
            }
        }
    }

    /// Record how the invocation sent to `selection` ended.
    pub fn on_invocation_finished(&self, selection: &Selection, success: bool) {
        self.tracker
            .on_invocation_finished(&selection.instance.instance_id, success, selection.invocation);
    }
}

fn selection(instance: &MicroserviceInstance, invocation: InvocationId, probe: bool) -> Selection {
    Selection {
        endpoint: instance.endpoints[0].clone(),
        instance: instance.clone(),
        invocation,
        probe,
    }
}

fn watch_store(store: &Arc<RegistryCacheStore>, tracker: &Arc<ServerStatsTracker>) {
    // Weak: the store owns the watcher.
    let store_ref: Weak<RegistryCacheStore> = Arc::downgrade(store);
    let tracker_ref: Weak<ServerStatsTracker> = Arc::downgrade(tracker);

    store.set_cache_refreshed_watcher(move |_changed: &[Arc<MicroserviceCacheEntry>]| {
        let (Some(store), Some(tracker)) = (store_ref.upgrade(), tracker_ref.upgrade()) else {
            return;
        };
        let live: HashSet<String> = store
            .entries()
            .iter()
            .flat_map(|entry| {
                entry
                    .instances()
                    .iter()
                    .map(|i| i.instance_id.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        tracker.retain_instances(&live);
    });
}
