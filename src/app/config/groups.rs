use super::ConfigError;
use crate::reliability::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "super::serde_helpers")]
    pub base_delay: Duration,
    #[serde(with = "super::serde_helpers")]
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> Result<RetryPolicy, ConfigError> {
        let backoff = Backoff::new(self.base_delay, self.max_delay).with_jitter(self.jitter);
        RetryPolicy::new(self.max_attempts, backoff)
            .map_err(|e| ConfigError::InvalidConfig(format!("retry: {e}")))
    }
}

/// Backoff between attempts to reopen the journal source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(with = "super::serde_helpers")]
    pub base_delay: Duration,
    #[serde(with = "super::serde_helpers")]
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Result<Backoff, ConfigError> {
        let backoff = Backoff::new(self.base_delay, self.max_delay);
        backoff
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("reconnect: {e}")))?;
        Ok(backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}
