//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the discovery
//! runtime. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the discovery runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Registry cache and instance pull settings.
    pub registry: RegistryConfig,

    /// Per-server statistics window.
    pub server_stats: ServerStatsConfig,

    /// Isolation policy for unhealthy servers.
    pub isolation: IsolationConfig,

    /// Recovery probe permit settings.
    pub trying_chance: TryingChanceConfig,

    /// Server selection rule.
    pub load_balancer: LoadBalancerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Optional local registry definition file.
    pub local_registry: Option<LocalRegistryConfig>,
}

/// Registry cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Interval between periodic instance pulls, in seconds.
    pub instance_pull_interval_secs: u64,

    /// Upper bound for a single registry fetch, in milliseconds.
    pub fetch_timeout_ms: u64,

    /// Start with zero-instance protection enabled.
    pub empty_instance_protection: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            instance_pull_interval_secs: 30,
            fetch_timeout_ms: 5_000,
            empty_instance_protection: false,
        }
    }
}

impl RegistryConfig {
    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.instance_pull_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Server statistics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerStatsConfig {
    /// Width of one statistics window in milliseconds.
    pub window_ms: u64,
}

impl Default for ServerStatsConfig {
    fn default() -> Self {
        Self { window_ms: 60_000 }
    }
}

/// Isolation policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Enable isolation of unhealthy servers.
    pub enabled: bool,

    /// Failed-rate percentage that isolates a server (0 disables the check).
    pub error_threshold_percentage: u32,

    /// Consecutive failures that isolate a server (0 disables the check).
    pub continuous_failure_threshold: u64,

    /// Requests needed in the current window before a server can be isolated.
    pub min_request_count: u64,

    /// Quiet period after the last visit before an isolated server may be probed.
    pub single_test_time_ms: u64,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            error_threshold_percentage: 0,
            continuous_failure_threshold: 5,
            min_request_count: 5,
            single_test_time_ms: 60_000,
        }
    }
}

/// Trying chance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TryingChanceConfig {
    /// Lifetime of a granted permit in milliseconds.
    pub ttl_ms: u64,
}

impl Default for TryingChanceConfig {
    fn default() -> Self {
        Self { ttl_ms: 60_000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// Load balancer configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Rule picking among available servers.
    pub rule: LoadBalanceRuleKind,
}

/// Selection rules understood by the load balancer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceRuleKind {
    #[default]
    RoundRobin,
    Random,
}

/// Location of a local registry definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalRegistryConfig {
    /// Path to the registry TOML file.
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: DiscoveryConfig = toml::from_str("").unwrap();
        assert_eq!(config.registry.instance_pull_interval_secs, 30);
        assert_eq!(config.server_stats.window_ms, 60_000);
        assert_eq!(config.trying_chance.ttl_ms, 60_000);
        assert!(config.isolation.enabled);
        assert!(config.local_registry.is_none());
    }

    #[test]
    fn test_partial_section_override() {
        let config: DiscoveryConfig = toml::from_str(
            r#"
            [registry]
            empty_instance_protection = true

            [isolation]
            error_threshold_percentage = 50

            [load_balancer]
            rule = "random"
            "#,
        )
        .unwrap();

        assert!(config.registry.empty_instance_protection);
        assert_eq!(config.registry.fetch_timeout_ms, 5_000);
        assert_eq!(config.isolation.error_threshold_percentage, 50);
        assert_eq!(config.isolation.continuous_failure_threshold, 5);
        assert_eq!(config.load_balancer.rule, LoadBalanceRuleKind::Random);
    }
}
