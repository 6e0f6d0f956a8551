//! Uniform random load balancing strategy.

use rand::Rng;

use crate::load_balancer::LoadBalanceRule;
use crate::registry::MicroserviceInstance;

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomRule;

impl LoadBalanceRule for RandomRule {
    fn next_server<'a>(&self, servers: &'a [MicroserviceInstance]) -> Option<&'a MicroserviceInstance> {
        if servers.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..servers.len());
        servers.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picks_from_list() {
        let servers: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| MicroserviceInstance::new(*id, "svc", vec!["rest://x:1".to_string()]))
            .collect();

        for _ in 0..20 {
            let picked = RandomRule.next_server(&servers).unwrap();
            assert!(servers.iter().any(|s| s.instance_id == picked.instance_id));
        }
        assert!(RandomRule.next_server(&[]).is_none());
    }
}
