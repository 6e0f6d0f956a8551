//! Isolation policy.
//!
//! # State Transitions
//! ```text
//! Available → Isolated: total >= min_request_count and
//!                       (continuous failures >= threshold or failed rate >= threshold);
//!                       a threshold of 0 turns its rule off
//! Isolated → Probe:     quiet for longer than single_test_time and the
//!                       invocation wins the trying chance
//! ```
//!
//! Isolation is recomputed from the current statistics on every check; a
//! server leaves isolation once a probe succeeds or its window rolls over.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::IsolationConfig;
use crate::health::stats::ServerStats;
use crate::health::trying_chance::{InvocationId, TryingChanceCoordinator};
use crate::observability::metrics;

/// Verdict for one server and one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Isolated,
    /// Isolated, but this invocation holds the trying chance for it.
    Probe,
}

impl Availability {
    pub fn is_selectable(self) -> bool {
        !matches!(self, Availability::Isolated)
    }
}

#[derive(Debug)]
pub struct IsolationFilter {
    config: IsolationConfig,
    clock: Arc<dyn Clock>,
    coordinator: Arc<TryingChanceCoordinator>,
}

impl IsolationFilter {
    pub fn new(config: IsolationConfig, clock: Arc<dyn Clock>, coordinator: Arc<TryingChanceCoordinator>) -> Self {
        Self {
            config,
            clock,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<TryingChanceCoordinator> {
        &self.coordinator
    }

    pub fn is_isolated(&self, stats: &ServerStats) -> bool {
        if !self.config.enabled || stats.total_requests() < self.config.min_request_count {
            return false;
        }
        // A threshold of 0 disables its rule.
        if self.config.continuous_failure_threshold > 0
            && stats.continuous_failure_count() >= self.config.continuous_failure_threshold
        {
            return true;
        }
        self.config.error_threshold_percentage > 0
            && stats.failed_rate() >= self.config.error_threshold_percentage
    }

    /// Decide whether `invocation` may be sent to the server behind `stats`.
    pub fn check(&self, stats: &ServerStats, invocation: InvocationId) -> Availability {
        if !self.is_isolated(stats) {
            return Availability::Available;
        }

        let quiet_for = self.clock.now_millis().saturating_sub(stats.last_visit_time());
        if quiet_for > self.config.single_test_time_ms && self.coordinator.apply_for_trying_chance(invocation) {
            tracing::info!(%invocation, quiet_ms = quiet_for, "Probing isolated server");
            return Availability::Probe;
        }

        metrics::record_server_isolated();
        Availability::Isolated
    }
}
