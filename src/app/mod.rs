pub mod config;
pub mod logging_system;
pub mod service;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingError, LoggingSystem, setup_logging_safe};
pub use service::{ForwarderService, ServiceError, ShutdownSummary};
pub use shutdown::SignalHandler;

use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct App {
    config: Config,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args(args)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs until SIGINT or SIGTERM and a completed drain.
    pub async fn run(self) -> Result<ShutdownSummary, ServiceError> {
        let service = ForwarderService::new(self.config)?;

        let shutdown = CancellationToken::new();
        let signals = SignalHandler::new()?.spawn(shutdown.clone());

        let result = service.run(shutdown.clone()).await;

        shutdown.cancel();
        if let Err(e) = signals.await {
            error!("Signal listener failed: {}", e);
        }
        result
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// Main entry point for the application
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = match App::from_args(std::env::args_os()) {
        Ok(app) => app,
        // --help, --version and usage errors
        Err(ConfigError::Cli(e)) => e.exit(),
        Err(e) => {
            let _ = setup_logging_safe(LogLevel::Info, LogFormat::Compact);
            error!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = setup_logging_safe(app.config().log_level, app.config().log_format) {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    info!("Starting journal-forwarder v{}", get_version());
    info!(
        "Configuration: endpoint={}, queue_capacity={}, overflow_policy={:?}, max_in_flight={}",
        app.config().endpoint,
        app.config().queue_capacity,
        app.config().overflow_policy,
        app.config().max_in_flight
    );

    if let Err(e) = app.run().await {
        error!("journal-forwarder failed: {}", e);
        process::exit(1);
    }

    Ok(())
}
