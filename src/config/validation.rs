//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows, intervals and timeouts > 0, percentages <= 100)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DiscoveryConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::DiscoveryConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("{field} must be a percentage between 0 and 100, got {value}")]
    NotAPercentage { field: &'static str, value: u32 },

    #[error("local_registry.path must not be empty")]
    EmptyLocalRegistryPath,
}

/// Check every semantic rule and collect all violations.
pub fn validate_config(config: &DiscoveryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let positive = [
        ("registry.instance_pull_interval_secs", config.registry.instance_pull_interval_secs),
        ("registry.fetch_timeout_ms", config.registry.fetch_timeout_ms),
        ("server_stats.window_ms", config.server_stats.window_ms),
        ("trying_chance.ttl_ms", config.trying_chance.ttl_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::MustBePositive { field });
        }
    }

    let pct = config.isolation.error_threshold_percentage;
    if pct > 100 {
        errors.push(ValidationError::NotAPercentage {
            field: "isolation.error_threshold_percentage",
            value: pct,
        });
    }

    if let Some(local) = &config.local_registry {
        if local.path.trim().is_empty() {
            errors.push(ValidationError::EmptyLocalRegistryPath);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
