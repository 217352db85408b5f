use super::config::{LogFormat, LogLevel};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoggingError {
    #[error("Invalid log level '{input}'")]
    InvalidLogLevel { input: String },

    #[error("Invalid directive format '{input}'. Expected: 'target=level'")]
    InvalidDirectiveFormat { input: String },

    #[error("Empty target in directive '{input}'")]
    EmptyTarget { input: String },

    #[error("Logging system initialization failed: {details}")]
    InitFailed { details: String },
}

/// What to do with a directive that does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    UseDefaultLevel,
    SkipDirective,
    Abort,
}

impl LoggingError {
    pub fn fallback_strategy(&self) -> FallbackStrategy {
        match self {
            LoggingError::InvalidLogLevel { .. } => FallbackStrategy::UseDefaultLevel,
            LoggingError::InvalidDirectiveFormat { .. } | LoggingError::EmptyTarget { .. } => {
                FallbackStrategy::SkipDirective
            }
            LoggingError::InitFailed { .. } => FallbackStrategy::Abort,
        }
    }
}

fn parse_level(input: &str) -> Result<LogLevel, LoggingError> {
    match input.to_lowercase().as_str() {
        "error" => Ok(LogLevel::Error),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        "trace" => Ok(LogLevel::Trace),
        _ => Err(LoggingError::InvalidLogLevel {
            input: input.to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogDirective {
    pub target: String,
    pub level: LogLevel,
}

impl LogDirective {
    pub fn new(target: impl Into<String>, level: LogLevel) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    pub fn parse(directive: &str) -> Result<Self, LoggingError> {
        let Some((target, level)) = directive.split_once('=') else {
            return Err(LoggingError::InvalidDirectiveFormat {
                input: directive.to_string(),
            });
        };
        if level.contains('=') {
            return Err(LoggingError::InvalidDirectiveFormat {
                input: directive.to_string(),
            });
        }

        let target = target.trim();
        if target.is_empty() {
            return Err(LoggingError::EmptyTarget {
                input: directive.to_string(),
            });
        }

        Ok(LogDirective::new(target, parse_level(level.trim())?))
    }

    pub fn to_filter_string(&self) -> String {
        format!("{}={}", self.target, self.level.as_str())
    }
}

// Dependencies that are chatty at info level
const NOISY_TARGETS: [&str; 4] = ["hyper", "reqwest", "h2", "warp"];

pub struct LoggingSystem {
    directives: Arc<RwLock<Vec<LogDirective>>>,
    fallback_level: LogLevel,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: Arc::new(RwLock::new(Vec::new())),
            fallback_level: LogLevel::Info,
        }
    }

    /// Adds a `target=level` directive. Malformed directives are skipped
    /// and unknown levels fall back to info; neither aborts startup.
    pub fn add_directive(&self, directive_str: &str) -> Result<(), LoggingError> {
        match LogDirective::parse(directive_str) {
            Ok(directive) => {
                self.directives.write().push(directive);
                Ok(())
            }
            Err(e) => match e.fallback_strategy() {
                FallbackStrategy::UseDefaultLevel => {
                    eprintln!("Warning: {e}, using default level");
                    let target = directive_str.split('=').next().unwrap_or_default().trim();
                    self.directives
                        .write()
                        .push(LogDirective::new(target, self.fallback_level));
                    Ok(())
                }
                FallbackStrategy::SkipDirective => {
                    eprintln!("Warning: {e}, skipping directive");
                    Ok(())
                }
                FallbackStrategy::Abort => Err(e),
            },
        }
    }

    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in NOISY_TARGETS {
            directives.push(LogDirective::new(target, LogLevel::Warn));
        }
    }

    /// Layers `RUST_LOG` directives (if set) over the defaults.
    pub fn add_env_directives(&self) -> Result<(), LoggingError> {
        if let Ok(value) = std::env::var(EnvFilter::DEFAULT_ENV) {
            for directive in value.split(',').filter(|d| !d.trim().is_empty()) {
                self.add_directive(directive)?;
            }
        }
        Ok(())
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();

        let mut filter_parts = Vec::with_capacity(directives.len() + 1);
        filter_parts.push(default_level.as_str().to_string());
        filter_parts.extend(directives.iter().map(LogDirective::to_filter_string));

        filter_parts.join(",")
    }

    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), LoggingError> {
        let filter_string = self.build_filter_string(default_level);
        let env_filter = EnvFilter::try_new(&filter_string).map_err(|e| LoggingError::InitFailed {
            details: format!("Failed to create EnvFilter with '{filter_string}': {e}"),
        })?;

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Compact => registry
                .with(fmt::layer().with_target(true).compact())
                .try_init(),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_current_span(false))
                .try_init(),
        };

        result.map_err(|e| LoggingError::InitFailed {
            details: format!("Failed to set global tracing subscriber: {e}"),
        })
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global subscriber once; later calls return the first
/// outcome.
pub fn setup_logging_safe(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    static INIT: OnceLock<Result<(), LoggingError>> = OnceLock::new();

    INIT.get_or_init(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        logging_system.add_env_directives()?;
        logging_system.initialize_tracing(level, format)
    })
    .clone()
}
