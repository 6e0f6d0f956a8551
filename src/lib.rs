//! Client-side service discovery runtime.
//!
//! Keeps a locally consistent view of remote service instances and decides
//! which of them are healthy enough to call.
//!
//! ```text
//! RegistryClient ──fetch──▶ RegistryCacheStore ──instances──▶ ServiceLoadBalancer
//!        ▲                   │   ▲                                 │
//!        │                   │   └── InstancePuller (periodic)     │ isolation + probe
//!        └── registry push ──┘                                     ▼
//!            events                         ServerStatsTracker ◀── invocation outcome
//!                                           TryingChanceCoordinator
//! ```

// Registry cache
pub mod registry;

// Server health and selection
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod clock;
pub mod config;
pub mod observability;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DiscoveryConfig;
pub use health::{InvocationId, ServerStats, TryingChanceCoordinator};
pub use load_balancer::ServiceLoadBalancer;
pub use registry::{MicroserviceCacheKey, RegistryCacheStore, RegistryClient};
