#![allow(dead_code)]

use bytes::Bytes;
use chrono::Utc;
use journal_forwarder::collector::{LogSource, SourceError};
use journal_forwarder::domain::{LogEvent, Severity};
use journal_forwarder::reliability::{Backoff, ForwarderMetrics, RetryPolicy};
use journal_forwarder::sender::{Ack, PublishError, Publisher};
use journal_forwarder::{Forwarder, ForwarderConfig, Topic};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn event(message: &str) -> LogEvent {
    LogEvent::new(Utc::now(), "test-unit", Severity::Info, message)
}

pub fn test_topic() -> Topic {
    Topic::new("journalctl", "gw-test")
}

/// Retry policy without jitter so delays are exact.
pub fn retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Backoff::new(Duration::from_millis(500), Duration::from_secs(10)),
    )
    .unwrap()
}

pub fn forwarder<P: Publisher>(
    publisher: Arc<P>,
    config: ForwarderConfig,
) -> (Forwarder<P>, ForwarderMetrics) {
    let metrics = ForwarderMetrics::new().unwrap();
    let forwarder = Forwarder::new(publisher, test_topic(), config, metrics.clone()).unwrap();
    (forwarder, metrics)
}

/// A source fed through a channel. Reads are cancel safe because
/// `mpsc::Receiver::recv` is.
pub struct ChannelSource {
    rx: mpsc::Receiver<LogEvent>,
    pub opens: Arc<AtomicUsize>,
}

pub fn channel_source(buffer: usize) -> (mpsc::Sender<LogEvent>, ChannelSource) {
    let (tx, rx) = mpsc::channel(buffer);
    (
        tx,
        ChannelSource {
            rx,
            opens: Arc::new(AtomicUsize::new(0)),
        },
    )
}

impl LogSource for ChannelSource {
    async fn open(&mut self) -> Result<(), SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<LogEvent>, SourceError> {
        Ok(self.rx.recv().await)
    }
}

type Rule = Box<dyn Fn(&str, u32) -> Result<Ack, PublishError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedCall {
    pub topic: String,
    pub message: String,
    pub attempt: u32,
}

/// Publisher whose answer is decided per call by a rule over the event
/// message and the attempt number for that message (1-based).
pub struct ScriptedPublisher {
    rule: Rule,
    delay: Duration,
    calls: Mutex<Vec<PublishedCall>>,
    attempts: Mutex<HashMap<String, u32>>,
    active: Mutex<HashMap<String, usize>>,
    concurrent: AtomicUsize,
    peak_concurrent: AtomicUsize,
    overlapping_same_task: AtomicUsize,
}

impl ScriptedPublisher {
    pub fn new<F>(rule: F) -> Self
    where
        F: Fn(&str, u32) -> Result<Ack, PublishError> + Send + Sync + 'static,
    {
        Self {
            rule: Box::new(rule),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            concurrent: AtomicUsize::new(0),
            peak_concurrent: AtomicUsize::new(0),
            overlapping_same_task: AtomicUsize::new(0),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(|_, _| Ok(Ack::default()))
    }

    /// Fails retryably on the first `failures` attempts of every event.
    pub fn failing_first(failures: u32) -> Self {
        Self::new(move |_, attempt| {
            if attempt <= failures {
                Err(PublishError::Busy { status: 503 })
            } else {
                Ok(Ack::default())
            }
        })
    }

    pub fn always_failing(error: PublishError) -> Self {
        Self::new(move |_, _| Err(error.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<PublishedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn attempts_for(&self, message: &str) -> u32 {
        self.attempts.lock().get(message).copied().unwrap_or(0)
    }

    /// Messages that got a successful answer, in answer order.
    pub fn delivered_messages(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| (self.rule)(&call.message, call.attempt).is_ok())
            .map(|call| call.message.clone())
            .collect()
    }

    pub fn peak_concurrent(&self) -> usize {
        self.peak_concurrent.load(Ordering::SeqCst)
    }

    pub fn overlapping_same_task(&self) -> usize {
        self.overlapping_same_task.load(Ordering::SeqCst)
    }
}

impl Publisher for ScriptedPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Ack, PublishError> {
        let json: serde_json::Value = serde_json::from_slice(&payload)
            .map_err(|e| PublishError::MalformedPayload(e.to_string()))?;
        let message = json["message"].as_str().unwrap_or_default().to_string();

        let attempt = {
            let mut attempts = self.attempts.lock();
            let attempt = attempts.entry(message.clone()).or_insert(0);
            *attempt += 1;
            *attempt
        };
        self.calls.lock().push(PublishedCall {
            topic: topic.to_string(),
            message: message.clone(),
            attempt,
        });

        {
            let mut active = self.active.lock();
            let count = active.entry(message.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.overlapping_same_task.fetch_add(1, Ordering::SeqCst);
            }
        }
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrent.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.active.lock().get_mut(&message) {
            *count -= 1;
        }

        (self.rule)(&message, attempt)
    }
}
