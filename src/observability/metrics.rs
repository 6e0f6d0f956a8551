//! Metrics collection.
//!
//! # Metrics
//! - `discovery_cache_refresh_total` (counter): entry refreshes by resulting `status`
//! - `discovery_cache_entries` (gauge): cached keys after the last sweep
//! - `discovery_cache_evictions_total` (counter): entries dropped for SERVICE_NOT_FOUND
//! - `discovery_refresh_dropped_total` (counter): periodic sweeps skipped because one was running
//! - `discovery_server_isolated_total` (counter): servers filtered out by isolation
//! - `discovery_trying_chance_total` (counter): trying-chance applications by `result`
//!
//! # Design Decisions
//! - Labels are static strings only, so label cardinality stays fixed

use metrics::{counter, gauge};

use crate::registry::CacheStatus;

pub fn record_cache_refresh(status: CacheStatus) {
    counter!("discovery_cache_refresh_total", "status" => status.as_str()).increment(1);
}

pub fn record_cache_entries(count: usize) {
    gauge!("discovery_cache_entries").set(count as f64);
}

pub fn record_cache_eviction() {
    counter!("discovery_cache_evictions_total").increment(1);
}

pub fn record_refresh_dropped() {
    counter!("discovery_refresh_dropped_total").increment(1);
}

pub fn record_server_isolated() {
    counter!("discovery_server_isolated_total").increment(1);
}

pub fn record_trying_chance(granted: bool) {
    let result = if granted { "granted" } else { "denied" };
    counter!("discovery_trying_chance_total", "result" => result).increment(1);
}
