//! Admission limits per resource key

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use courier_resilience::{KeyedLimiter, RateLimitConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rate limit table: a default plus per-key overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Limits applied to keys without an override
    #[serde(default)]
    pub default: RateLimitConfig,

    /// Per-resource-key overrides (provider names, "graph-read", "graph-write")
    #[serde(default)]
    pub per_key: HashMap<String, RateLimitConfig>,
}

impl RateLimitsConfig {
    /// Build the process-wide limiter from this table
    pub fn build_limiter(&self) -> KeyedLimiter {
        KeyedLimiter::with_limits(self.default.clone(), self.per_key.clone())
    }
}

impl Validatable for RateLimitsConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.validate_entry("default", &self.default)?;
        for (key, config) in &self.per_key {
            self.validate_entry(key, config)?;
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "rate_limits"
    }
}

impl RateLimitsConfig {
    fn validate_entry(&self, key: &str, config: &RateLimitConfig) -> ConfigResult<()> {
        validate_positive(config.max_concurrent, "max_concurrent", self.domain_name())
            .map_err(|_| self.validation_error(format!("{}: max_concurrent must be greater than 0", key)))?;
        validate_positive(
            config.capacity_per_window,
            "capacity_per_window",
            self.domain_name(),
        )
        .map_err(|_| self.validation_error(format!("{}: capacity_per_window must be greater than 0", key)))?;
        if config.window.is_zero() {
            return Err(self.validation_error(format!("{}: window must be greater than 0", key)));
        }
        Ok(())
    }
}
