//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! choose(key, invocation)
//!     → registry store (cached instances for the key)
//!     → keep UP instances with an endpoint
//!     → health isolation filter per instance:
//!         - available → candidate
//!         - isolated, probe granted → chosen directly
//!         - isolated → skipped
//!     → rule over candidates:
//!         - round_robin.rs (rotate through servers)
//!         - random.rs (uniform pick)
//! ```
//!
//! # Design Decisions
//! - Rules are stateless with respect to health; filtering happens first
//! - A granted probe wins over the rule so the permit is not wasted
//! - Stats of instances that leave the registry are dropped on cache change

pub mod balancer;
pub mod random;
pub mod round_robin;

use crate::config::LoadBalanceRuleKind;
use crate::registry::MicroserviceInstance;

pub use balancer::{BalancerError, Selection, ServiceLoadBalancer};
pub use random::RandomRule;
pub use round_robin::RoundRobin;

/// Picks one server out of the already-filtered candidates.
pub trait LoadBalanceRule: Send + Sync + std::fmt::Debug {
    fn next_server<'a>(&self, servers: &'a [MicroserviceInstance]) -> Option<&'a MicroserviceInstance>;
}

/// Build the rule named in configuration.
pub fn rule_for(kind: LoadBalanceRuleKind) -> Box<dyn LoadBalanceRule> {
    match kind {
        LoadBalanceRuleKind::RoundRobin => Box::new(RoundRobin::new()),
        LoadBalanceRuleKind::Random => Box::new(RandomRule),
    }
}
