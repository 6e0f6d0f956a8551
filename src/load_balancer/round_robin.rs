//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::LoadBalanceRule;
use crate::registry::MicroserviceInstance;

/// Round-robin selector.
/// Stores an internal counter to rotate through servers.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalanceRule for RoundRobin {
    fn next_server<'a>(&self, servers: &'a [MicroserviceInstance]) -> Option<&'a MicroserviceInstance> {
        if servers.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % servers.len();
        servers.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str) -> MicroserviceInstance {
        MicroserviceInstance::new(id, "svc", vec![format!("rest://{id}:8080")])
    }

    #[test]
    fn test_round_robin() {
        let rule = RoundRobin::new();
        let servers = vec![server("a"), server("b")];

        assert_eq!(rule.next_server(&servers).unwrap().instance_id, "a");
        assert_eq!(rule.next_server(&servers).unwrap().instance_id, "b");
        assert_eq!(rule.next_server(&servers).unwrap().instance_id, "a");
    }

    #[test]
    fn test_empty_list() {
        let rule = RoundRobin::new();
        assert!(rule.next_server(&[]).is_none());
    }
}
