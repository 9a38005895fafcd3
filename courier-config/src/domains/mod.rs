//! Domain-specific configuration modules

pub mod graph;
pub mod http;
pub mod rate_limit;
pub mod resilience;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Courier configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CourierConfig {
    /// Retry policy defaults per resource kind
    #[serde(default)]
    pub resilience: resilience::ResilienceConfig,

    /// Admission limits per resource key
    #[serde(default)]
    pub rate_limits: rate_limit::RateLimitsConfig,

    /// Graph session pool configuration
    #[serde(default)]
    pub graph: graph::GraphConfig,

    /// Provider HTTP client configuration
    #[serde(default)]
    pub http: http::HttpConfig,
}

impl CourierConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.resilience.validate()?;
        self.rate_limits.validate()?;
        self.graph.validate()?;
        self.http.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = CourierConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
