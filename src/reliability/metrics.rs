use crate::buffer::DropReason;
#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[cfg(feature = "metrics")]
use tokio_util::sync::CancellationToken;
#[cfg(feature = "metrics")]
use warp::{Filter, Reply};

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("HTTP server error: {0}")]
    HttpError(String),
}

/// Which side of the taxonomy a publish failure fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFailureKind {
    Retryable,
    Fatal,
}

impl PublishFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishFailureKind::Retryable => "retryable",
            PublishFailureKind::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub events_read: u64,
    pub source_reconnects: u64,
    pub publish_attempts: u64,
    pub retryable_failures: u64,
    pub fatal_failures: u64,
    pub retries_scheduled: u64,
    pub delivered: u64,
    pub dropped_evicted: u64,
    pub dropped_retries_exhausted: u64,
    pub dropped_fatal: u64,
    pub dropped_abandoned: u64,
}

impl MetricsSnapshot {
    pub fn dropped(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::Evicted => self.dropped_evicted,
            DropReason::RetriesExhausted => self.dropped_retries_exhausted,
            DropReason::Fatal => self.dropped_fatal,
            DropReason::Abandoned => self.dropped_abandoned,
        }
    }

    pub fn total_dropped(&self) -> u64 {
        DropReason::ALL.iter().map(|reason| self.dropped(*reason)).sum()
    }
}

#[derive(Default)]
struct Counters {
    events_read: AtomicU64,
    source_reconnects: AtomicU64,
    publish_attempts: AtomicU64,
    retryable_failures: AtomicU64,
    fatal_failures: AtomicU64,
    retries_scheduled: AtomicU64,
    delivered: AtomicU64,
    dropped: [AtomicU64; 4],
}

#[cfg(feature = "metrics")]
struct PrometheusMetrics {
    registry: Registry,
    events_read: IntCounter,
    source_reconnects: IntCounter,
    publish_attempts: IntCounter,
    publish_failures: IntCounterVec,
    delivered: IntCounter,
    dropped: IntCounterVec,
    queue_depth: IntGauge,
}

#[cfg(feature = "metrics")]
impl PrometheusMetrics {
    fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let events_read = IntCounter::new(
            "journal_forwarder_events_read_total",
            "Journal events read from the source",
        )?;
        registry.register(Box::new(events_read.clone()))?;

        let source_reconnects = IntCounter::new(
            "journal_forwarder_source_reconnects_total",
            "Reconnects to the journal source after an error",
        )?;
        registry.register(Box::new(source_reconnects.clone()))?;

        let publish_attempts = IntCounter::new(
            "journal_forwarder_publish_attempts_total",
            "Publish calls made, including retries",
        )?;
        registry.register(Box::new(publish_attempts.clone()))?;

        let publish_failures = IntCounterVec::new(
            prometheus::Opts::new(
                "journal_forwarder_publish_failures_total",
                "Failed publish calls",
            ),
            &["kind"], // retryable, fatal
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let delivered = IntCounter::new(
            "journal_forwarder_delivered_total",
            "Events acknowledged by the endpoint",
        )?;
        registry.register(Box::new(delivered.clone()))?;

        let dropped = IntCounterVec::new(
            prometheus::Opts::new(
                "journal_forwarder_dropped_total",
                "Events that left the pipeline undelivered",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(dropped.clone()))?;

        let queue_depth = IntGauge::new(
            "journal_forwarder_queue_depth",
            "Tasks admitted to the queue and not yet finished",
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            events_read,
            source_reconnects,
            publish_attempts,
            publish_failures,
            delivered,
            dropped,
            queue_depth,
        })
    }
}

/// Counters for everything the pipeline reads, delivers, retries or drops.
///
/// Atomic counters are always kept so snapshots work without the
/// `metrics` feature; with it, every update is mirrored into Prometheus.
#[derive(Clone)]
pub struct ForwarderMetrics {
    counters: Arc<Counters>,
    #[cfg(feature = "metrics")]
    prometheus: Arc<PrometheusMetrics>,
}

impl ForwarderMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            counters: Arc::new(Counters::default()),
            #[cfg(feature = "metrics")]
            prometheus: Arc::new(PrometheusMetrics::new()?),
        })
    }

    pub fn record_event_read(&self) {
        self.counters.events_read.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus.events_read.inc();
    }

    pub fn record_reconnect(&self) {
        self.counters
            .source_reconnects
            .fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus.source_reconnects.inc();
    }

    pub fn record_attempt(&self) {
        self.counters.publish_attempts.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus.publish_attempts.inc();
    }

    pub fn record_failure(&self, kind: PublishFailureKind) {
        let counter = match kind {
            PublishFailureKind::Retryable => &self.counters.retryable_failures,
            PublishFailureKind::Fatal => &self.counters.fatal_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        self.prometheus
            .publish_failures
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn record_retry_scheduled(&self) {
        self.counters
            .retries_scheduled
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus.delivered.inc();
    }

    pub fn record_dropped(&self, reason: DropReason) {
        self.counters.dropped[reason as usize].fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus
            .dropped
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        #[cfg(feature = "metrics")]
        self.prometheus.queue_depth.set(depth as i64);
        #[cfg(not(feature = "metrics"))]
        let _ = depth;
    }

    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        let dropped = |reason: DropReason| c.dropped[reason as usize].load(Ordering::Relaxed);

        MetricsSnapshot {
            events_read: c.events_read.load(Ordering::Relaxed),
            source_reconnects: c.source_reconnects.load(Ordering::Relaxed),
            publish_attempts: c.publish_attempts.load(Ordering::Relaxed),
            retryable_failures: c.retryable_failures.load(Ordering::Relaxed),
            fatal_failures: c.fatal_failures.load(Ordering::Relaxed),
            retries_scheduled: c.retries_scheduled.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped_evicted: dropped(DropReason::Evicted),
            dropped_retries_exhausted: dropped(DropReason::RetriesExhausted),
            dropped_fatal: dropped(DropReason::Fatal),
            dropped_abandoned: dropped(DropReason::Abandoned),
        }
    }

    #[cfg(feature = "metrics")]
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    #[cfg(not(feature = "metrics"))]
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        Ok("# Metrics disabled\n".to_string())
    }
}

impl std::fmt::Debug for ForwarderMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwarderMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Serves `/metrics` and `/health` until the token is cancelled.
pub struct PrometheusExporter {
    port: u16,
    metrics: ForwarderMetrics,
}

impl PrometheusExporter {
    pub fn new(port: u16, metrics: ForwarderMetrics) -> Self {
        Self { port, metrics }
    }

    #[cfg(feature = "metrics")]
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), MetricsError> {
        let metrics = self.metrics.clone();

        let export = warp::path!("metrics")
            .and(warp::get())
            .map(move || match metrics.export_metrics() {
                Ok(metrics_text) => warp::reply::with_header(
                    metrics_text,
                    "content-type",
                    "text/plain; version=0.0.4",
                )
                .into_response(),
                Err(_) => warp::reply::with_status(
                    "Internal Server Error",
                    warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                )
                .into_response(),
            });

        let health = warp::path!("health").and(warp::get()).map(|| "OK");

        let routes = export.or(health);

        let (addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(([0, 0, 0, 0], self.port), async move {
                cancel.cancelled().await;
            })
            .map_err(|e| MetricsError::HttpError(e.to_string()))?;

        tracing::info!("Serving Prometheus metrics on {}", addr);
        server.await;
        Ok(())
    }

    #[cfg(not(feature = "metrics"))]
    pub async fn serve(
        self,
        _cancel: tokio_util::sync::CancellationToken,
    ) -> Result<(), MetricsError> {
        tracing::warn!(
            "Metrics feature is disabled; not serving port {}",
            self.port
        );
        let _ = self.metrics;
        Ok(())
    }
}
