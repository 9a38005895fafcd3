//! Graph session pool configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Graph database pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Maximum sessions checked out simultaneously
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Interval for the pool utilization sampler
    #[serde(with = "humantime_serde", default = "default_sampler_interval")]
    pub sampler_interval: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            sampler_interval: default_sampler_interval(),
        }
    }
}

impl Validatable for GraphConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_sessions, "max_sessions", self.domain_name())?;
        if self.sampler_interval.is_zero() {
            return Err(self.validation_error("sampler_interval must be greater than 0"));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "graph"
    }
}

fn default_max_sessions() -> usize {
    50
}

fn default_sampler_interval() -> Duration {
    Duration::from_secs(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.max_sessions, 50);
        assert_eq!(config.sampler_interval, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_sessions_rejected() {
        let config = GraphConfig {
            max_sessions: 0,
            ..GraphConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
