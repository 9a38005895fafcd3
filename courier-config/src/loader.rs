//! Configuration loading and environment variable handling

use crate::domains::CourierConfig;
use crate::error::{ConfigError, ConfigResult};
use log::debug;
use std::path::Path;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "COURIER".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<CourierConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: CourierConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<CourierConfig> {
        let mut config = CourierConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<CourierConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut CourierConfig) -> ConfigResult<()> {
        self.apply_resilience_overrides(&mut config.resilience)?;
        self.apply_graph_overrides(&mut config.graph)?;
        self.apply_http_overrides(&mut config.http)?;
        Ok(())
    }

    /// Apply graph transaction retry overrides
    ///
    /// These knobs tune both graph policies; provider policies come from the
    /// config file.
    fn apply_resilience_overrides(
        &self,
        config: &mut crate::domains::resilience::ResilienceConfig,
    ) -> ConfigResult<()> {
        if let Ok(max_retries) = self.get_env_var("MAX_RETRIES") {
            let retries: u32 = max_retries
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_RETRIES: {}", e)))?;
            config.graph_read.max_retries = retries;
            config.graph_write.max_retries = retries;
            debug!("MAX_RETRIES override applied: {}", retries);
        }

        if let Ok(delay) = self.get_env_var("INITIAL_RETRY_DELAY_MS") {
            let ms: u64 = delay.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid INITIAL_RETRY_DELAY_MS: {}", e))
            })?;
            config.graph_read.initial_delay = Duration::from_millis(ms);
            config.graph_write.initial_delay = Duration::from_millis(ms);
        }

        if let Ok(delay) = self.get_env_var("MAX_RETRY_DELAY_MS") {
            let ms: u64 = delay
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_RETRY_DELAY_MS: {}", e)))?;
            config.graph_read.max_delay = Duration::from_millis(ms);
            config.graph_write.max_delay = Duration::from_millis(ms);
        }

        if let Ok(multiplier) = self.get_env_var("BACKOFF_MULTIPLIER") {
            let factor: f64 = multiplier
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid BACKOFF_MULTIPLIER: {}", e)))?;
            config.graph_read.backoff_multiplier = factor;
            config.graph_write.backoff_multiplier = factor;
        }

        if let Ok(timeout) = self.get_env_var("GRAPH_TIMEOUT_MS") {
            let ms: u64 = timeout
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid GRAPH_TIMEOUT_MS: {}", e)))?;
            config.graph_read.timeout = Duration::from_millis(ms);
            config.graph_write.timeout = Duration::from_millis(ms);
        }

        Ok(())
    }

    /// Apply graph pool overrides
    fn apply_graph_overrides(
        &self,
        config: &mut crate::domains::graph::GraphConfig,
    ) -> ConfigResult<()> {
        if let Ok(sessions) = self.get_env_var("GRAPH_MAX_SESSIONS") {
            config.max_sessions = sessions
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid GRAPH_MAX_SESSIONS: {}", e)))?;
        }

        if let Ok(interval) = self.get_env_var("GRAPH_SAMPLE_INTERVAL_SECS") {
            let seconds: u64 = interval.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid GRAPH_SAMPLE_INTERVAL_SECS: {}", e))
            })?;
            config.sampler_interval = Duration::from_secs(seconds);
        }

        Ok(())
    }

    /// Apply HTTP config overrides
    fn apply_http_overrides(
        &self,
        config: &mut crate::domains::http::HttpConfig,
    ) -> ConfigResult<()> {
        if let Ok(timeout) = self.get_env_var("HTTP_TIMEOUT") {
            let seconds: u64 = timeout
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid HTTP_TIMEOUT: {}", e)))?;
            config.timeout = Duration::from_secs(seconds);
        }

        if let Ok(user_agent) = self.get_env_var("HTTP_USER_AGENT") {
            config.user_agent = user_agent;
        }

        if let Ok(verify_ssl) = self.get_env_var("HTTP_VERIFY_SSL") {
            config.verify_ssl = verify_ssl
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid HTTP_VERIFY_SSL: {}", e)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
