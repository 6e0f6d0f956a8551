//! One refreshable view of a service's instance list.
//!
//! # State machine
//! ```text
//! INITIAL ──refresh──▶ REFRESHED | NO_CHANGE | SERVICE_NOT_FOUND | REFRESH_FAILED
//!                         ▲                                            │
//!                         └────────────── next refresh ────────────────┘
//! ```
//!
//! # Design Decisions
//! - Instances and revision live in one `ArcSwap` snapshot: readers never block
//!   and never observe a half-applied refresh
//! - Writers (refresh, incremental events) are serialized per entry by an async mutex
//! - The first refresh runs exactly once through a `OnceCell`, no matter how many
//!   callers race on a freshly created entry

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, OnceCell};
use tokio::time;

use crate::observability::metrics;
use crate::registry::client::{FetchOutcome, RegistryClient};
use crate::registry::types::{
    CacheStatus, ChangeType, MicroserviceCacheKey, MicroserviceInstance,
    MicroserviceInstanceChangedEvent, RegistryError, VERSION_RULE_ALL,
};

/// Decides whether an empty instance list is a registry fault rather than a
/// real scale-down. Only consulted while zero-instance protection is enabled.
pub trait EmptyInstancePolicy: Send + Sync + fmt::Debug {
    fn is_suspicious(&self, key: &MicroserviceCacheKey, previous: &[MicroserviceInstance]) -> bool;
}

/// Treats any transition from a non-empty list to an empty one as suspicious.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetainNonEmpty;

impl EmptyInstancePolicy for RetainNonEmpty {
    fn is_suspicious(&self, _key: &MicroserviceCacheKey, previous: &[MicroserviceInstance]) -> bool {
        !previous.is_empty()
    }
}

/// Settings shared by every entry of a store.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    pub fetch_timeout: Duration,
    pub empty_instance_protection: bool,
    pub empty_policy: Arc<dyn EmptyInstancePolicy>,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(5),
            empty_instance_protection: false,
            empty_policy: Arc::new(RetainNonEmpty),
        }
    }
}

#[derive(Debug, Default)]
struct CachedInstances {
    instances: Arc<Vec<MicroserviceInstance>>,
    revision: Option<String>,
}

/// Cached, refreshable instance list for one [`MicroserviceCacheKey`].
pub struct MicroserviceCacheEntry {
    key: MicroserviceCacheKey,
    client: Arc<dyn RegistryClient>,
    state: ArcSwap<CachedInstances>,
    status: AtomicU8,
    empty_protection: AtomicBool,
    empty_policy: Arc<dyn EmptyInstancePolicy>,
    fetch_timeout: Duration,
    write_lock: Mutex<()>,
    initialized: OnceCell<()>,
}

impl MicroserviceCacheEntry {
    pub fn new(key: MicroserviceCacheKey, client: Arc<dyn RegistryClient>, options: &EntryOptions) -> Self {
        Self {
            key,
            client,
            state: ArcSwap::from_pointee(CachedInstances::default()),
            status: AtomicU8::new(CacheStatus::Initial as u8),
            empty_protection: AtomicBool::new(options.empty_instance_protection),
            empty_policy: options.empty_policy.clone(),
            fetch_timeout: options.fetch_timeout,
            write_lock: Mutex::new(()),
            initialized: OnceCell::new(),
        }
    }

    pub fn key(&self) -> &MicroserviceCacheKey {
        &self.key
    }

    /// Outcome of the most recent refresh attempt.
    pub fn status(&self) -> CacheStatus {
        CacheStatus::from(self.status.load(Ordering::Acquire))
    }

    /// Last known instance list.
    pub fn instances(&self) -> Arc<Vec<MicroserviceInstance>> {
        self.state.load().instances.clone()
    }

    /// Revision marker recorded by the last successful refresh.
    pub fn revision(&self) -> Option<String> {
        self.state.load().revision.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    pub fn empty_instance_protection(&self) -> bool {
        self.empty_protection.load(Ordering::Acquire)
    }

    pub fn set_empty_instance_protection(&self, enabled: bool) {
        self.empty_protection.store(enabled, Ordering::Release);
    }

    /// Run the first refresh; later callers wait for it instead of fetching again.
    pub async fn initialize(&self) {
        self.initialized
            .get_or_init(|| async {
                self.refresh().await;
            })
            .await;
    }

    /// Pull the current instance set from the registry.
    pub async fn refresh(&self) -> CacheStatus {
        let _guard = self.write_lock.lock().await;
        let status = self.refresh_locked().await;
        self.set_status(status);
        metrics::record_cache_refresh(status);
        status
    }

    /// Forget the revision, then refresh, so any remote state counts as changed.
    pub async fn force_refresh(&self) -> CacheStatus {
        self.clear_revision_id();
        self.refresh().await
    }

    /// Drop the stored revision marker without touching instances.
    pub fn clear_revision_id(&self) {
        self.state.rcu(|current| CachedInstances {
            instances: current.instances.clone(),
            revision: None,
        });
    }

    async fn refresh_locked(&self) -> CacheStatus {
        let outcome = match time::timeout(self.fetch_timeout, self.client.fetch_instances(&self.key)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(RegistryError::ServiceNotFound { .. })) => FetchOutcome::NotFound,
            Ok(Err(e)) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to refresh instances, keeping last known list");
                return CacheStatus::RefreshFailed;
            }
            Err(_) => {
                let e = RegistryError::Timeout(self.fetch_timeout.as_millis() as u64);
                tracing::warn!(key = %self.key, error = %e, "Failed to refresh instances, keeping last known list");
                return CacheStatus::RefreshFailed;
            }
        };

        let snapshot = match outcome {
            FetchOutcome::Found(snapshot) => snapshot,
            FetchOutcome::NotFound => {
                tracing::info!(key = %self.key, "Service not found in registry");
                return CacheStatus::ServiceNotFound;
            }
        };

        let current = self.state.load_full();
        if snapshot.revision.is_some() && snapshot.revision == current.revision {
            return CacheStatus::NoChange;
        }

        if snapshot.instances.is_empty() && self.protects_against_empty(&current.instances) {
            tracing::warn!(
                key = %self.key,
                previous = current.instances.len(),
                revision = ?snapshot.revision,
                "Registry returned no instances, keeping previous list (empty instance protection)"
            );
            self.state.store(Arc::new(CachedInstances {
                instances: current.instances.clone(),
                revision: snapshot.revision,
            }));
            return CacheStatus::NoChange;
        }

        tracing::debug!(
            key = %self.key,
            instances = snapshot.instances.len(),
            revision = ?snapshot.revision,
            "Instance list refreshed"
        );
        self.state.store(Arc::new(CachedInstances {
            instances: Arc::new(snapshot.instances),
            revision: snapshot.revision,
        }));
        CacheStatus::Refreshed
    }

    /// Apply an incremental change. Returns `None` when the event does not
    /// concern this entry or leaves it unchanged.
    pub async fn on_instance_changed(&self, event: &MicroserviceInstanceChangedEvent) -> Option<CacheStatus> {
        if event.app_id != self.key.app_id() || event.service_name != self.key.service_name() {
            return None;
        }

        let _guard = self.write_lock.lock().await;
        let current = self.state.load_full();
        let position = current
            .instances
            .iter()
            .position(|i| i.instance_id == event.instance_id);

        let mut instances = (*current.instances).clone();
        match (event.change_type, position) {
            (ChangeType::Create | ChangeType::Update, Some(pos)) => {
                if instances[pos] == event.updated_instance {
                    return None;
                }
                instances[pos] = event.updated_instance.clone();
            }
            (ChangeType::Create | ChangeType::Update, None) => {
                if !self.accepts_service(&current.instances, &event.service_id) {
                    // Version rule can't be checked locally; let the next pull decide.
                    self.clear_revision_id();
                    return None;
                }
                instances.push(event.updated_instance.clone());
            }
            (ChangeType::Delete | ChangeType::Expire, Some(pos)) => {
                instances.remove(pos);
            }
            (ChangeType::Delete | ChangeType::Expire, None) => return None,
        }

        let status = if instances.is_empty() && self.protects_against_empty(&current.instances) {
            tracing::warn!(
                key = %self.key,
                instance_id = %event.instance_id,
                "Ignoring removal of the last instance (empty instance protection)"
            );
            CacheStatus::NoChange
        } else {
            tracing::debug!(
                key = %self.key,
                instance_id = %event.instance_id,
                change = ?event.change_type,
                "Applied instance change"
            );
            self.state.store(Arc::new(CachedInstances {
                instances: Arc::new(instances),
                revision: current.revision.clone(),
            }));
            CacheStatus::Refreshed
        };
        self.set_status(status);
        Some(status)
    }

    fn accepts_service(&self, current: &[MicroserviceInstance], service_id: &str) -> bool {
        self.key.version_rule() == VERSION_RULE_ALL || current.iter().any(|i| i.service_id == service_id)
    }

    fn protects_against_empty(&self, previous: &[MicroserviceInstance]) -> bool {
        self.empty_instance_protection() && self.empty_policy.is_suspicious(&self.key, previous)
    }

    fn set_status(&self, status: CacheStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

impl fmt::Debug for MicroserviceCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroserviceCacheEntry")
            .field("key", &self.key)
            .field("status", &self.status())
            .field("instances", &self.instances().len())
            .field("revision", &self.revision())
            .finish()
    }
}
