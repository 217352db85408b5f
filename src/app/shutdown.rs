use super::service::ServiceError;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal as unix_signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Waits for SIGINT or (on unix) SIGTERM.
///
/// Handlers are registered on construction so a signal that arrives while
/// the pipeline is still starting is not lost.
#[derive(Debug)]
pub struct SignalHandler {
    #[cfg(unix)]
    sigterm: Signal,
}

impl SignalHandler {
    pub fn new() -> Result<Self, ServiceError> {
        Ok(Self {
            #[cfg(unix)]
            sigterm: unix_signal(SignalKind::terminate()).map_err(ServiceError::Signal)?,
        })
    }

    /// Resolves with the name of the first signal received.
    pub async fn wait(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                result = signal::ctrl_c() => match result {
                    Ok(()) => "SIGINT",
                    Err(err) => {
                        error!("Failed to listen for SIGINT: {}", err);
                        self.sigterm.recv().await;
                        "SIGTERM"
                    }
                },
                _ = self.sigterm.recv() => "SIGTERM",
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(err) = signal::ctrl_c().await {
                error!("Failed to listen for SIGINT: {}", err);
                std::future::pending::<()>().await;
            }
            "SIGINT"
        }
    }

    /// Cancels `token` on the first signal.
    pub fn spawn(mut self, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                name = self.wait() => {
                    info!("Received {}, initiating graceful shutdown", name);
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        })
    }
}
