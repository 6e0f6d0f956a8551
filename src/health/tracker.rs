//! Statistics per destination instance.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::health::stats::ServerStats;
use crate::health::trying_chance::{InvocationId, TryingChanceCoordinator};

/// Owns one [`ServerStats`] per instance id.
#[derive(Debug)]
pub struct ServerStatsTracker {
    stats: DashMap<String, Arc<ServerStats>>,
    clock: Arc<dyn Clock>,
    window_ms: u64,
    coordinator: Arc<TryingChanceCoordinator>,
}

impl ServerStatsTracker {
    pub fn new(clock: Arc<dyn Clock>, window_ms: u64, coordinator: Arc<TryingChanceCoordinator>) -> Self {
        Self {
            stats: DashMap::new(),
            clock,
            window_ms,
            coordinator,
        }
    }

    /// Stats for `instance_id`, created on first use.
    pub fn stats_for(&self, instance_id: &str) -> Arc<ServerStats> {
        if let Some(stats) = self.stats.get(instance_id) {
            return stats.clone();
        }
        self.stats
            .entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(ServerStats::new(self.clock.clone(), self.window_ms)))
            .clone()
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<ServerStats>> {
        self.stats.get(instance_id).map(|s| s.clone())
    }

    /// Record the outcome of `invocation` against `instance_id` and hand back
    /// the trying chance if this invocation held it.
    pub fn on_invocation_finished(&self, instance_id: &str, success: bool, invocation: InvocationId) {
        let stats = self.stats_for(instance_id);
        if success {
            stats.mark_success();
        } else {
            stats.mark_failure();
        }

        if self.coordinator.check_and_release(invocation) {
            tracing::info!(instance_id, success, %invocation, "Probe finished, trying chance released");
        }
    }

    /// Drop stats of instances not in `live`.
    pub fn retain_instances(&self, live: &HashSet<String>) {
        let before = self.stats.len();
        self.stats.retain(|id, _| live.contains(id));
        let dropped = before.saturating_sub(self.stats.len());
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped stats of vanished instances");
        }
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}
