use super::publisher::{Ack, PublishError, Publisher};
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub user_agent: String,
    pub max_payload_bytes: usize,
    pub qos: u8,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            max_connections: 4,
            user_agent: format!("journal-forwarder/{}", env!("CARGO_PKG_VERSION")),
            max_payload_bytes: 128 * 1024,
            qos: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
}

#[derive(Debug, Default)]
struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_time: AtomicU64,
}

impl ClientStats {
    fn record_request(&self, success: bool, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Publishes over the REST face of an MQTT broker:
/// `POST <endpoint>/topics/<topic>?qos=<n>` with the JSON payload as body.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: Client,
    config: PublisherConfig,
    endpoint_url: Url,
    stats: Arc<ClientStats>,
}

impl HttpPublisher {
    pub fn new(config: PublisherConfig) -> Result<Self, ClientError> {
        let endpoint_url: Url = config.endpoint.parse().map_err(|e| {
            ClientError::InvalidConfiguration(format!("Invalid endpoint URL: {e}"))
        })?;

        if endpoint_url.cannot_be_a_base() {
            return Err(ClientError::InvalidConfiguration(format!(
                "Endpoint URL cannot be used as a base: {endpoint_url}"
            )));
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            endpoint_url,
            stats: Arc::new(ClientStats::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// URL for `topic`; the topic is one path segment, so `/` is encoded.
    pub fn topic_url(&self, topic: &str) -> Url {
        let mut url = self.endpoint_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("topics").push(topic);
        }
        url.query_pairs_mut()
            .append_pair("qos", &self.config.qos.to_string());
        url
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let total_requests = self.stats.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.stats.total_response_time.load(Ordering::Relaxed);

        let average_response_time = if total_requests > 0 {
            Duration::from_millis(total_response_time / total_requests)
        } else {
            Duration::ZERO
        };

        ConnectionStats {
            total_requests,
            successful_requests: self.stats.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            average_response_time,
        }
    }

    fn classify_transport_error(&self, error: reqwest::Error) -> PublishError {
        if error.is_timeout() {
            PublishError::Timeout(self.config.timeout)
        } else {
            PublishError::Network(error.to_string())
        }
    }
}

impl Publisher for HttpPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Ack, PublishError> {
        let size = payload.len();
        if size > self.config.max_payload_bytes {
            return Err(PublishError::PayloadTooLarge {
                size,
                limit: self.config.max_payload_bytes,
            });
        }

        let start = Instant::now();
        let response = self
            .client
            .post(self.topic_url(topic))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_request(false, start.elapsed());
                return Err(self.classify_transport_error(e));
            }
        };

        let status = response.status();
        let latency = start.elapsed();
        self.stats.record_request(status.is_success(), latency);

        if status.is_success() {
            debug!("Published {} bytes to {} in {:?}", size, topic, latency);
            return Ok(Ack {
                status: status.as_u16(),
            });
        }

        let message = response.text().await.unwrap_or_default();
        warn!("Publish to {} failed: HTTP {}", topic, status.as_u16());
        Err(PublishError::from_status(
            status.as_u16(),
            message,
            size,
            self.config.max_payload_bytes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_url_encodes_topic_as_one_segment() {
        let publisher = HttpPublisher::new(PublisherConfig {
            endpoint: "https://broker.example.com:8443/".to_string(),
            ..Default::default()
        })
        .unwrap();

        let url = publisher.topic_url("journalctl/gw-17");
        assert_eq!(
            url.as_str(),
            "https://broker.example.com:8443/topics/journalctl%2Fgw-17?qos=1"
        );
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        let result = HttpPublisher::new(PublisherConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ClientError::InvalidConfiguration(_))));
    }
}
