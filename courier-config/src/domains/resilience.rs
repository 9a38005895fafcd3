//! Retry policy defaults per resource kind

use crate::error::ConfigResult;
use crate::validation::Validatable;
use courier_resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named retry policies for the resource kinds the service calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Policy for external provider calls
    #[serde(default)]
    pub provider: RetryPolicy,

    /// Policy for graph read transactions
    #[serde(default = "default_graph_read")]
    pub graph_read: RetryPolicy,

    /// Policy for graph write transactions
    #[serde(default = "default_graph_write")]
    pub graph_write: RetryPolicy,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            provider: RetryPolicy::default(),
            graph_read: default_graph_read(),
            graph_write: default_graph_write(),
        }
    }
}

impl ResilienceConfig {
    /// Select the policy for a resource key
    ///
    /// Graph kinds have dedicated keys; everything else is treated as a
    /// provider name.
    pub fn policy_for(&self, key: &str) -> &RetryPolicy {
        match key {
            "graph-read" => &self.graph_read,
            "graph-write" => &self.graph_write,
            _ => &self.provider,
        }
    }
}

impl Validatable for ResilienceConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (name, policy) in [
            ("provider", &self.provider),
            ("graph_read", &self.graph_read),
            ("graph_write", &self.graph_write),
        ] {
            self.validate_policy(name, policy)?;
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "resilience"
    }
}

impl ResilienceConfig {
    fn validate_policy(&self, name: &str, policy: &RetryPolicy) -> ConfigResult<()> {
        if policy.initial_delay.is_zero() {
            return Err(self.validation_error(format!("{}.initial_delay must be greater than 0", name)));
        }
        if policy.backoff_multiplier < 1.0 {
            return Err(self.validation_error(format!("{}.backoff_multiplier must be at least 1", name)));
        }
        if policy.max_delay < policy.initial_delay {
            return Err(self.validation_error(format!("{}.max_delay must be at least initial_delay", name)));
        }
        if policy.timeout.is_zero() {
            return Err(self.validation_error(format!("{}.timeout must be greater than 0", name)));
        }
        Ok(())
    }
}

fn default_graph_read() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(2),
        backoff_multiplier: 2.0,
        timeout: Duration::from_secs(10),
    }
}

fn default_graph_write() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
        backoff_multiplier: 2.0,
        timeout: Duration::from_secs(10),
    }
}
