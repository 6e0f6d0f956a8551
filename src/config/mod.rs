//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DiscoveryConfig (validated, immutable)
//!     → sections handed to the registry store, stats tracker and balancer
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::DiscoveryConfig;
pub use schema::IsolationConfig;
pub use schema::LoadBalanceRuleKind;
pub use schema::LoadBalancerConfig;
pub use schema::LocalRegistryConfig;
pub use schema::ObservabilityConfig;
pub use schema::RegistryConfig;
pub use schema::ServerStatsConfig;
pub use schema::TryingChanceConfig;
