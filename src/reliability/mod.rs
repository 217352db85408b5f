pub mod metrics;
pub mod retry;

pub use metrics::{
    ForwarderMetrics, MetricsError, MetricsSnapshot, PrometheusExporter, PublishFailureKind,
};
pub use retry::{Backoff, RetryDecision, RetryError, RetryPolicy};
