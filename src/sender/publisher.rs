use crate::reliability::PublishFailureKind;
use bytes::Bytes;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Acknowledgement returned by the endpoint for one published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
}

impl Default for Ack {
    fn default() -> Self {
        Self { status: 200 }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    // Retryable
    #[error("Network error: {0}")]
    Network(String),
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),
    #[error("Endpoint busy: HTTP {status}")]
    Busy { status: u16 },

    // Fatal
    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Credentials rejected: HTTP {status}")]
    Unauthorized { status: u16 },
    #[error("Publish rejected: HTTP {status} - {message}")]
    Rejected { status: u16, message: String },
}

impl PublishError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishError::Network(_) | PublishError::Timeout(_) | PublishError::Busy { .. }
        )
    }

    pub fn kind(&self) -> PublishFailureKind {
        if self.is_retryable() {
            PublishFailureKind::Retryable
        } else {
            PublishFailureKind::Fatal
        }
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, message: String, payload_size: usize, limit: usize) -> Self {
        match status {
            413 => PublishError::PayloadTooLarge {
                size: payload_size,
                limit,
            },
            401 | 403 => PublishError::Unauthorized { status },
            408 | 429 | 500..=599 => PublishError::Busy { status },
            _ => PublishError::Rejected { status, message },
        }
    }
}

/// The outbound side of the pipeline: delivers one payload to one topic.
pub trait Publisher: Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<Ack, PublishError>> + Send;
}

/// Logs payloads instead of sending them.
#[derive(Debug, Default)]
pub struct DryRunPublisher {
    published: AtomicU64,
}

impl DryRunPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Publisher for DryRunPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Ack, PublishError> {
        self.published.fetch_add(1, Ordering::Relaxed);
        info!(
            topic,
            payload = %String::from_utf8_lossy(&payload),
            "dry-run publish"
        );
        Ok(Ack::default())
    }
}
