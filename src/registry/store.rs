//! Keyed collection of cache entries.
//!
//! # Responsibilities
//! - Resolve a key to a live entry, creating and refreshing it on first use
//! - Periodic (droppable) and forced (blocking) refresh sweeps
//! - Evict entries whose service disappeared
//! - Apply pushed instance changes and safe-mode toggles
//! - Tell the registered watcher which entries changed

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::Mutex;

use crate::config::RegistryConfig;
use crate::observability::metrics;
use crate::registry::client::RegistryClient;
use crate::registry::entry::{EmptyInstancePolicy, EntryOptions, MicroserviceCacheEntry};
use crate::registry::types::{
    CacheStatus, MicroserviceCacheKey, MicroserviceInstanceChangedEvent, RegistryResult,
    SafeModeChangeEvent,
};

/// Receives the entries that changed during a refresh or event.
pub trait CacheChangeListener: Send + Sync {
    fn on_caches_changed(&self, changed: &[Arc<MicroserviceCacheEntry>]);
}

impl<F> CacheChangeListener for F
where
    F: Fn(&[Arc<MicroserviceCacheEntry>]) + Send + Sync,
{
    fn on_caches_changed(&self, changed: &[Arc<MicroserviceCacheEntry>]) {
        self(changed)
    }
}

/// Registry cache shared by the routing and load-balancing layers.
pub struct RegistryCacheStore {
    client: Arc<dyn RegistryClient>,
    caches: DashMap<MicroserviceCacheKey, Arc<MicroserviceCacheEntry>>,
    options: EntryOptions,
    empty_protection: AtomicBool,
    watcher: ArcSwapOption<Box<dyn CacheChangeListener>>,
    refresh_lock: Mutex<()>,
}

impl RegistryCacheStore {
    /// Create a store from the registry configuration section.
    pub fn new(client: Arc<dyn RegistryClient>, config: &RegistryConfig) -> Self {
        Self::with_options(
            client,
            EntryOptions {
                fetch_timeout: config.fetch_timeout(),
                empty_instance_protection: config.empty_instance_protection,
                ..EntryOptions::default()
            },
        )
    }

    pub fn with_options(client: Arc<dyn RegistryClient>, options: EntryOptions) -> Self {
        Self {
            client,
            caches: DashMap::new(),
            empty_protection: AtomicBool::new(options.empty_instance_protection),
            options,
            watcher: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Replace the predicate deciding when an empty list is suspicious.
    pub fn with_empty_policy(mut self, policy: Arc<dyn EmptyInstancePolicy>) -> Self {
        self.options.empty_policy = policy;
        self
    }

    /// Register the listener told about changed entries. Replaces any previous one.
    pub fn set_cache_refreshed_watcher(&self, watcher: impl CacheChangeListener + 'static) {
        self.watcher.store(Some(Arc::new(Box::new(watcher))));
    }

    /// Resolve a key to its entry, creating and refreshing it on first lookup.
    ///
    /// An entry whose service is not found is returned once and evicted, so the
    /// next lookup starts over with a fresh entry.
    pub async fn find_service_cache(&self, key: &MicroserviceCacheKey) -> RegistryResult<Arc<MicroserviceCacheEntry>> {
        key.validate()?;

        let entry = self
            .caches
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(key = %key, "Creating microservice cache");
                Arc::new(self.create_entry(key.clone()))
            })
            .value()
            .clone();
        metrics::record_cache_entries(self.caches.len());

        entry.initialize().await;
        if entry.status() == CacheStatus::ServiceNotFound {
            self.evict(&entry);
        }
        Ok(entry)
    }

    /// Entry for `key` if one is cached, without creating it.
    pub fn get(&self, key: &MicroserviceCacheKey) -> Option<Arc<MicroserviceCacheEntry>> {
        self.caches.get(key).map(|r| r.value().clone())
    }

    /// Snapshot of every cached entry.
    pub fn entries(&self) -> Vec<Arc<MicroserviceCacheEntry>> {
        self.caches.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Periodic sweep. Returns `false` without touching anything when another
    /// sweep is already running.
    pub async fn refresh_cache(&self) -> bool {
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            tracing::info!("Ignoring concurrent cache refresh request");
            metrics::record_refresh_dropped();
            return false;
        };
        self.refresh_all(false).await;
        true
    }

    /// Sweep that waits for any running sweep and then always runs.
    pub async fn force_refresh_cache(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_all(true).await;
    }

    async fn refresh_all(&self, forced: bool) {
        // Entries still running their first refresh are left to it.
        let entries: Vec<_> = self
            .entries()
            .into_iter()
            .filter(|entry| entry.is_initialized())
            .collect();

        let statuses = join_all(entries.iter().map(|entry| async move {
            if forced {
                entry.force_refresh().await
            } else {
                entry.refresh().await
            }
        }))
        .await;

        let changed: Vec<_> = entries
            .into_iter()
            .zip(statuses)
            .filter(|(_, status)| status.is_changed())
            .map(|(entry, _)| entry)
            .collect();

        tracing::debug!(forced, changed = changed.len(), total = self.caches.len(), "Cache refresh pass finished");
        self.evict_not_found(&changed);
        self.notify_watcher(&changed);
    }

    /// Apply a pushed instance change to the entries it concerns.
    pub async fn on_microservice_instance_changed(&self, event: &MicroserviceInstanceChangedEvent) {
        let mut changed = Vec::new();
        for entry in self.entries() {
            if let Some(status) = entry.on_instance_changed(event).await {
                if status.is_changed() {
                    changed.push(entry);
                }
            }
        }

        tracing::info!(
            service = %event.service_name,
            instance_id = %event.instance_id,
            change = ?event.change_type,
            changed = changed.len(),
            "Instance change event applied"
        );
        self.evict_not_found(&changed);
        self.notify_watcher(&changed);
    }

    /// Broadcast the zero-instance protection flag to every entry.
    pub fn on_safe_mode_changed(&self, event: SafeModeChangeEvent) {
        self.empty_protection.store(event.enabled, Ordering::Release);
        for entry in self.caches.iter() {
            entry.value().set_empty_instance_protection(event.enabled);
        }
        tracing::info!(enabled = event.enabled, "Safe mode changed");
    }

    pub fn empty_instance_protection(&self) -> bool {
        self.empty_protection.load(Ordering::Acquire)
    }

    /// Force the next refresh of `key` to treat the registry state as changed.
    pub fn clear_revision_id(&self, key: &MicroserviceCacheKey) {
        if let Some(entry) = self.caches.get(key) {
            entry.value().clear_revision_id();
        }
    }

    pub fn clear_all_revision_id(&self) {
        for entry in self.caches.iter() {
            entry.value().clear_revision_id();
        }
    }

    fn create_entry(&self, key: MicroserviceCacheKey) -> MicroserviceCacheEntry {
        let options = EntryOptions {
            empty_instance_protection: self.empty_instance_protection(),
            ..self.options.clone()
        };
        MicroserviceCacheEntry::new(key, self.client.clone(), &options)
    }

    fn evict_not_found(&self, changed: &[Arc<MicroserviceCacheEntry>]) {
        for entry in changed {
            if entry.status() == CacheStatus::ServiceNotFound {
                self.evict(entry);
            }
        }
    }

    fn evict(&self, entry: &Arc<MicroserviceCacheEntry>) {
        // Only remove this exact entry; a newer one may already sit under the key.
        if self
            .caches
            .remove_if(entry.key(), |_, cached| Arc::ptr_eq(cached, entry))
            .is_some()
        {
            tracing::info!(key = %entry.key(), "Microservice cache removed");
            metrics::record_cache_eviction();
            metrics::record_cache_entries(self.caches.len());
        }
    }

    fn notify_watcher(&self, changed: &[Arc<MicroserviceCacheEntry>]) {
        if changed.is_empty() {
            return;
        }
        if let Some(watcher) = self.watcher.load_full() {
            watcher.on_caches_changed(changed);
        }
    }
}

impl std::fmt::Debug for RegistryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCacheStore")
            .field("entries", &self.caches.len())
            .field("empty_protection", &self.empty_instance_protection())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::local::LocalRegistryClient;
    use crate::registry::types::{ChangeType, MicroserviceInstance, RegistryError};
    use std::sync::Mutex as StdMutex;

    fn key(service: &str) -> MicroserviceCacheKey {
        MicroserviceCacheKey::all_versions("consumer", "app", service)
    }

    fn registry_with(service: &str, n: usize) -> Arc<LocalRegistryClient> {
        let registry = Arc::new(LocalRegistryClient::new());
        for i in 0..n {
            registry.register_instance("app", service, "1.0.0", vec![format!("rest://10.0.0.{i}:8080")]);
        }
        registry
    }

    #[tokio::test]
    async fn test_find_creates_once_and_reuses() {
        let registry = registry_with("orders", 2);
        let store = RegistryCacheStore::with_options(registry, EntryOptions::default());

        let first = store.find_service_cache(&key("orders")).await.unwrap();
        assert_eq!(first.status(), CacheStatus::Refreshed);
        assert_eq!(first.instances().len(), 2);

        let second = store.find_service_cache(&key("orders")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let store = RegistryCacheStore::with_options(registry_with("orders", 1), EntryOptions::default());
        let err = store
            .find_service_cache(&MicroserviceCacheKey::all_versions("consumer", "", "orders"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidKey(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_not_found_entry_evicted() {
        let store = RegistryCacheStore::with_options(registry_with("orders", 1), EntryOptions::default());

        let missing = store.find_service_cache(&key("payments")).await.unwrap();
        assert_eq!(missing.status(), CacheStatus::ServiceNotFound);
        assert!(store.get(&key("payments")).is_none());

        let again = store.find_service_cache(&key("payments")).await.unwrap();
        assert!(!Arc::ptr_eq(&missing, &again), "fresh entry, not the evicted one");
    }

    #[tokio::test]
    async fn test_refresh_notifies_only_changed_entries() {
        let registry = registry_with("orders", 1);
        registry.register_instance("app", "users", "1.0.0", vec!["rest://10.0.1.1:8080".into()]);
        let store = RegistryCacheStore::with_options(registry.clone(), EntryOptions::default());

        let seen: Arc<StdMutex<Vec<Vec<String>>>> = Arc::default();
        let sink = seen.clone();
        store.set_cache_refreshed_watcher(move |changed: &[Arc<MicroserviceCacheEntry>]| {
            let names = changed.iter().map(|e| e.key().service_name().to_string()).collect();
            sink.lock().unwrap().push(names);
        });

        store.find_service_cache(&key("orders")).await.unwrap();
        store.find_service_cache(&key("users")).await.unwrap();

        // Nothing changed remotely: no notification.
        assert!(store.refresh_cache().await);
        assert!(seen.lock().unwrap().is_empty());

        registry.register_instance("app", "orders", "1.0.0", vec!["rest://10.0.0.9:8080".into()]);
        store.refresh_cache().await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[vec!["orders".to_string()]]);
        assert_eq!(store.get(&key("orders")).unwrap().instances().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_evicts_vanished_service() {
        let registry = registry_with("orders", 1);
        let store = RegistryCacheStore::with_options(registry.clone(), EntryOptions::default());
        store.find_service_cache(&key("orders")).await.unwrap();

        registry.remove_service("app", "orders");
        store.force_refresh_cache().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_safe_mode_broadcast() {
        let registry = registry_with("orders", 2);
        let store = RegistryCacheStore::with_options(registry, EntryOptions::default());
        let entry = store.find_service_cache(&key("orders")).await.unwrap();

        store.on_safe_mode_changed(SafeModeChangeEvent { enabled: true });
        assert!(entry.empty_instance_protection());

        let created_later = store.find_service_cache(&key("missing")).await.unwrap();
        assert!(created_later.empty_instance_protection());

        store.on_safe_mode_changed(SafeModeChangeEvent { enabled: false });
        assert!(!entry.empty_instance_protection());
    }

    #[tokio::test]
    async fn test_instance_event_touches_matching_entries_only() {
        let registry = registry_with("orders", 1);
        registry.register_instance("app", "users", "1.0.0", vec!["rest://10.0.1.1:8080".into()]);
        let store = RegistryCacheStore::with_options(registry, EntryOptions::default());
        let orders = store.find_service_cache(&key("orders")).await.unwrap();
        let users = store.find_service_cache(&key("users")).await.unwrap();

        let notified: Arc<StdMutex<usize>> = Arc::default();
        let sink = notified.clone();
        store.set_cache_refreshed_watcher(move |changed: &[Arc<MicroserviceCacheEntry>]| {
            assert!(changed.iter().all(|e| e.key().service_name() == "orders"));
            *sink.lock().unwrap() += changed.len();
        });

        let service_id = orders.instances()[0].service_id.clone();
        let added = MicroserviceInstance::new("pushed-1", service_id, vec!["rest://10.0.0.50:8080".into()]);
        store
            .on_microservice_instance_changed(&MicroserviceInstanceChangedEvent::new(
                "app",
                "orders",
                ChangeType::Create,
                added,
            ))
            .await;

        assert_eq!(*notified.lock().unwrap(), 1);
        assert_eq!(orders.instances().len(), 2);
        assert_eq!(users.instances().len(), 1);
        assert_eq!(users.status(), CacheStatus::Refreshed);
    }

    #[tokio::test]
    async fn test_clear_revision_makes_next_refresh_a_change() {
        let store = RegistryCacheStore::with_options(registry_with("orders", 1), EntryOptions::default());
        let entry = store.find_service_cache(&key("orders")).await.unwrap();

        store.refresh_cache().await;
        assert_eq!(entry.status(), CacheStatus::NoChange);

        store.clear_all_revision_id();
        store.refresh_cache().await;
        assert_eq!(entry.status(), CacheStatus::Refreshed);

        store.clear_revision_id(&key("orders"));
        assert!(entry.revision().is_none());
    }
}
