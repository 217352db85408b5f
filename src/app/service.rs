use super::{Config, ConfigError};
use crate::{
    collector::{JournalctlSource, LogSource, Reader},
    domain::Topic,
    forwarder::{Forwarder, ForwarderError},
    reliability::{ForwarderMetrics, MetricsError, MetricsSnapshot, PrometheusExporter},
    sender::{ClientError, DryRunPublisher, HttpPublisher, Publisher},
};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Forwarder error: {0}")]
    ForwarderError(#[from] ForwarderError),
    #[error("Publisher error: {0}")]
    PublisherError(#[from] ClientError),
    #[error("Metrics error: {0}")]
    MetricsError(#[from] MetricsError),
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// What happened to the events seen during one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownSummary {
    /// Events admitted to the queue
    pub admitted: u64,
    /// Events delivered while draining
    pub drained: usize,
    pub metrics: MetricsSnapshot,
}

/// Wires reader, forwarder and publisher together and runs them until
/// shutdown.
pub struct ForwarderService {
    config: Config,
    topic: Topic,
    metrics: ForwarderMetrics,
}

impl ForwarderService {
    /// Resolves the device identity; fails fast when it is missing.
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let topic = config.resolve_topic()?;
        let metrics = ForwarderMetrics::new()?;

        Ok(Self {
            config,
            topic,
            metrics,
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn metrics(&self) -> &ForwarderMetrics {
        &self.metrics
    }

    /// Follows the system journal with the configured publisher.
    pub async fn run(self, shutdown: CancellationToken) -> Result<ShutdownSummary, ServiceError> {
        let source = JournalctlSource::new(self.config.journal_config());

        if self.config.dry_run {
            info!("Dry run: payloads are logged, not published");
            self.run_with(Arc::new(DryRunPublisher::new()), source, shutdown)
                .await
        } else {
            let publisher = HttpPublisher::new(self.config.publisher_config())?;
            info!("Publishing to {}", publisher.endpoint());
            self.run_with(Arc::new(publisher), source, shutdown).await
        }
    }

    /// Runs the pipeline until `shutdown` is cancelled, then stops the
    /// reader and drains the forwarder.
    pub async fn run_with<P, S>(
        self,
        publisher: Arc<P>,
        source: S,
        shutdown: CancellationToken,
    ) -> Result<ShutdownSummary, ServiceError>
    where
        P: Publisher,
        S: LogSource,
    {
        let forwarder = Arc::new(Forwarder::new(
            publisher,
            self.topic.clone(),
            self.config.forwarder_config()?,
            self.metrics.clone(),
        )?);
        let reader = Reader::new(
            source,
            self.config.reconnect_config.backoff()?,
            self.metrics.clone(),
        );
        let reader_handle = reader.handle();

        let exporter_cancel = CancellationToken::new();
        let exporter = self.spawn_exporter(exporter_cancel.clone());

        forwarder.start();
        let pump = {
            let forwarder = forwarder.clone();
            tokio::spawn(async move { forwarder.run(reader.start()).await })
        };

        info!("journal-forwarder running, topic {}", self.topic);
        shutdown.cancelled().await;

        reader_handle.stop();
        let drained = forwarder.drain(self.config.drain_timeout).await;

        let admitted = match pump.await {
            Ok(admitted) => admitted,
            Err(e) => {
                error!("Event pump failed: {}", e);
                0
            }
        };

        exporter_cancel.cancel();
        if let Some(exporter) = exporter {
            match exporter.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Metrics exporter stopped with error: {}", e),
                Err(e) => error!("Metrics exporter task failed: {}", e),
            }
        }

        let metrics = self.metrics.snapshot();
        info!(
            admitted,
            drained,
            delivered = metrics.delivered,
            dropped = metrics.total_dropped(),
            reconnects = metrics.source_reconnects,
            "journal-forwarder stopped"
        );

        Ok(ShutdownSummary {
            admitted,
            drained,
            metrics,
        })
    }

    fn spawn_exporter(
        &self,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<Result<(), MetricsError>>> {
        if !self.config.metrics_config.enabled {
            return None;
        }

        let exporter =
            PrometheusExporter::new(self.config.metrics_config.port, self.metrics.clone());
        Some(tokio::spawn(exporter.serve(cancel)))
    }
}
