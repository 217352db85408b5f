use super::groups::{MetricsConfig, ReconnectConfig, RetryConfig};
use super::{ConfigError, LogFormat, LogLevel};
use crate::buffer::OverflowPolicy;
use crate::collector::JournalConfig;
use crate::domain::Topic;
use crate::forwarder::ForwarderConfig;
use crate::sender::PublisherConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TOPIC_PREFIX: &str = "journalctl";
const DEFAULT_IDENTITY_ENV: &str = "AWS_IOT_THING_NAME";
const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080";

#[derive(Parser, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Topic prefix; events go to <prefix>/<device identity>
    #[arg(long, env = "TOPIC_PREFIX", default_value = DEFAULT_TOPIC_PREFIX)]
    pub topic_prefix: String,

    /// Environment variable holding the device identity
    #[arg(long, env = "IDENTITY_ENV", default_value = DEFAULT_IDENTITY_ENV)]
    pub identity_env: String,

    /// Base URL of the broker's HTTP publish API
    #[arg(long, env = "PUBLISH_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Per-publish timeout in seconds
    #[arg(long, env = "PUBLISH_TIMEOUT_SECS", default_value_t = 10)]
    pub publish_timeout_secs: u64,

    /// Connection timeout in seconds
    #[arg(long, env = "CONNECTION_TIMEOUT_SECS", default_value_t = 5)]
    pub connection_timeout_secs: u64,

    /// Maximum idle HTTP connections kept to the endpoint
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 4)]
    pub max_connections: usize,

    /// Largest payload sent; bigger events are dropped as fatal
    #[arg(long, env = "MAX_PAYLOAD_BYTES", default_value_t = 131_072)]
    pub max_payload_bytes: usize,

    /// Tasks held by the queue, including in-flight ones
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    /// Behaviour when the queue is full (required)
    #[arg(long, env = "OVERFLOW_POLICY")]
    pub overflow_policy: Option<OverflowPolicy>,

    /// Concurrent publishes
    #[arg(long, env = "MAX_IN_FLIGHT", default_value_t = 4)]
    pub max_in_flight: usize,

    /// Publish attempts per event before it is dropped
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value_t = 500)]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value_t = 10_000)]
    pub retry_max_delay_ms: u64,

    /// Randomize retry delays by up to ±50%
    #[arg(long, env = "RETRY_JITTER", default_value_t = true, action = clap::ArgAction::Set)]
    pub retry_jitter: bool,

    #[arg(long, env = "RECONNECT_BASE_DELAY_MS", default_value_t = 1000)]
    pub reconnect_base_delay_ms: u64,

    #[arg(long, env = "RECONNECT_MAX_DELAY_MS", default_value_t = 30_000)]
    pub reconnect_max_delay_ms: u64,

    /// How long shutdown waits for queued events
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 5)]
    pub drain_timeout_secs: u64,

    #[arg(long, env = "JOURNALCTL_PATH", default_value = "journalctl")]
    pub journalctl_path: PathBuf,

    /// Only follow this systemd unit
    #[arg(long, env = "JOURNAL_UNIT")]
    pub unit: Option<String>,

    /// Only follow this syslog identifier
    #[arg(long, env = "JOURNAL_IDENTIFIER")]
    pub identifier: Option<String>,

    /// Start from this point in time instead of the tail (journalctl syntax)
    #[arg(long, env = "JOURNAL_SINCE")]
    pub since: Option<String>,

    /// Backlog entries forwarded at startup
    #[arg(long, env = "JOURNAL_LINES", default_value_t = 0)]
    pub lines: u32,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Enable metrics export
    #[arg(long, env = "ENABLE_METRICS")]
    pub enable_metrics: bool,

    /// Metrics export port
    #[arg(long, env = "METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Log payloads instead of publishing them
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// Log every forwarded event at debug level
    #[arg(long, env = "ECHO_EVENTS")]
    pub echo_events: bool,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub publish_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub connection_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub drain_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub retry_config: RetryConfig,

    #[serde(skip)]
    #[arg(skip)]
    pub reconnect_config: ReconnectConfig,

    #[serde(skip)]
    #[arg(skip)]
    pub metrics_config: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_file: None,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            identity_env: DEFAULT_IDENTITY_ENV.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            publish_timeout_secs: 10,
            connection_timeout_secs: 5,
            max_connections: 4,
            max_payload_bytes: 131_072,
            queue_capacity: 1024,
            overflow_policy: None,
            max_in_flight: 4,
            max_attempts: 5,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            retry_jitter: true,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            drain_timeout_secs: 5,
            journalctl_path: PathBuf::from("journalctl"),
            unit: None,
            identifier: None,
            since: None,
            lines: 0,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            enable_metrics: false,
            metrics_port: 9090,
            dry_run: false,
            echo_events: false,
            publish_timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
            retry_config: RetryConfig::default(),
            reconnect_config: ReconnectConfig::default(),
            metrics_config: MetricsConfig::default(),
        }
    }
}

// Takes the file's value wherever the command line left the default.
macro_rules! prefer_file {
    ($cli:ident, $file:ident, $defaults:ident; $($field:ident),+ $(,)?) => {
        $(
            if $cli.$field == $defaults.$field {
                $cli.$field = $file.$field;
            }
        )+
    };
}

impl Config {
    /// Parses arguments and environment, layering `--config-file` (if any)
    /// underneath them.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::try_parse_from(args)?;

        if let Some(path) = config.config_file.clone() {
            let file = Self::read_file(&path)?;
            config.merge_file(file);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path.as_ref())?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn merge_file(&mut self, file: Config) {
        let defaults = Config::default();
        prefer_file!(self, file, defaults;
            topic_prefix,
            identity_env,
            endpoint,
            publish_timeout_secs,
            connection_timeout_secs,
            max_connections,
            max_payload_bytes,
            queue_capacity,
            overflow_policy,
            max_in_flight,
            max_attempts,
            retry_base_delay_ms,
            retry_max_delay_ms,
            retry_jitter,
            reconnect_base_delay_ms,
            reconnect_max_delay_ms,
            drain_timeout_secs,
            journalctl_path,
            unit,
            identifier,
            since,
            lines,
            log_level,
            log_format,
            enable_metrics,
            metrics_port,
            dry_run,
            echo_events,
        );
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.publish_timeout = Duration::from_secs(self.publish_timeout_secs);
        self.connection_timeout = Duration::from_secs(self.connection_timeout_secs);
        self.drain_timeout = Duration::from_secs(self.drain_timeout_secs);

        self.retry_config = RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
        };
        self.reconnect_config = ReconnectConfig {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
        };

        self.metrics_config.enabled = self.enable_metrics;
        self.metrics_config.port = self.metrics_port;

        Ok(())
    }

    /// Reads the device identity from the environment, once, and builds
    /// the publish topic from it.
    pub fn resolve_topic(&self) -> Result<Topic, ConfigError> {
        let identity = std::env::var(&self.identity_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::MissingIdentity {
                var: self.identity_env.clone(),
            })?;

        Ok(Topic::new(&self.topic_prefix, &identity))
    }

    pub fn overflow_policy(&self) -> Result<OverflowPolicy, ConfigError> {
        self.overflow_policy
            .ok_or(ConfigError::MissingOverflowPolicy)
    }

    pub fn forwarder_config(&self) -> Result<ForwarderConfig, ConfigError> {
        Ok(ForwarderConfig {
            capacity: self.queue_capacity,
            overflow_policy: self.overflow_policy()?,
            max_in_flight: self.max_in_flight,
            retry: self.retry_config.policy()?,
            echo_events: self.echo_events,
        })
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            endpoint: self.endpoint.clone(),
            timeout: self.publish_timeout,
            connection_timeout: self.connection_timeout,
            max_connections: self.max_connections,
            max_payload_bytes: self.max_payload_bytes,
            ..PublisherConfig::default()
        }
    }

    pub fn journal_config(&self) -> JournalConfig {
        JournalConfig {
            journalctl_path: self.journalctl_path.clone(),
            unit: self.unit.clone(),
            identifier: self.identifier.clone(),
            since: self.since.clone(),
            lines: self.lines,
        }
    }
}
