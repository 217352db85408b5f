use super::{Config, ConfigError};
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.overflow_policy()?;

        // Validate endpoint URL
        let endpoint = Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint must use http or https: {}",
                self.endpoint
            )));
        }

        if self.topic_prefix.contains(['#', '+']) {
            return Err(ConfigError::InvalidConfig(format!(
                "Topic prefix may not contain wildcards: {}",
                self.topic_prefix
            )));
        }

        if self.max_in_flight == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_in_flight must be greater than 0".to_string(),
            ));
        }

        // Eviction needs a queued task to push out even when every worker
        // is busy.
        if self.queue_capacity <= self.max_in_flight {
            return Err(ConfigError::InvalidConfig(format!(
                "Queue capacity ({}) must exceed max_in_flight ({})",
                self.queue_capacity, self.max_in_flight
            )));
        }

        if self.max_payload_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_payload_bytes must be greater than 0".to_string(),
            ));
        }

        // Validate timeouts
        for (name, secs) in [
            ("Publish timeout", self.publish_timeout_secs),
            ("Connection timeout", self.connection_timeout_secs),
            ("Drain timeout", self.drain_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        self.retry_config.policy()?;
        self.reconnect_config.backoff()?;

        Ok(())
    }
}
