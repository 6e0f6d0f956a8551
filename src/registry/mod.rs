//! Registry cache subsystem.
//!
//! # Data Flow
//! ```text
//! find_service_cache(key)
//!     → store.rs (get-or-create entry, evict SERVICE_NOT_FOUND)
//!     → entry.rs (first refresh, exactly once)
//!     → client.rs (RegistryClient::fetch_instances)
//!
//! puller.rs tick / force refresh
//!     → store.rs sweep (try-lock or blocking lock)
//!     → entry.rs refresh per entry, failures stay per entry
//!     → changed entries → CacheChangeListener
//!
//! Registry push events
//!     → store.rs (instance change, safe mode)
//!     → matching entries updated in place
//! ```
//!
//! # Design Decisions
//! - Registry I/O failures never escape an entry; they become REFRESH_FAILED
//! - Readers always see a complete instance list (atomic snapshot swap)
//! - Empty-list protection is a pluggable predicate, enabled by safe mode

pub mod client;
pub mod entry;
pub mod local;
pub mod puller;
pub mod store;
pub mod types;

pub use client::{FetchOutcome, InstancesSnapshot, RegistryClient};
pub use entry::{EmptyInstancePolicy, EntryOptions, MicroserviceCacheEntry, RetainNonEmpty};
pub use local::LocalRegistryClient;
pub use puller::{InstancePuller, PullerHandle};
pub use store::{CacheChangeListener, RegistryCacheStore};
pub use types::{
    CacheStatus, ChangeType, InstanceStatus, MicroserviceCacheKey, MicroserviceInstance,
    MicroserviceInstanceChangedEvent, RegistryError, RegistryResult, SafeModeChangeEvent,
};
