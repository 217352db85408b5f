//! Bounded, back-pressured delivery of journal events.
//!
//! `Forwarder::submit` admits events into a [`TaskQueue`]; a fixed pool of
//! workers publishes them, parks retryable failures with backoff and drops
//! tasks that fail fatally or run out of attempts. `drain` is the shutdown
//! half: it closes admission and waits a bounded time for the queue to
//! empty, abandoning whatever is left.

mod worker;

use crate::buffer::{
    DropReason, OverflowPolicy, PublishTask, PushOutcome, QueueError, QueueMetrics, TaskQueue,
};
use crate::domain::{LogEvent, Topic};
use crate::reliability::{ForwarderMetrics, RetryPolicy};
use crate::sender::Publisher;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use worker::Worker;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("Invalid forwarder configuration: {0}")]
    InvalidConfig(String),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Worker count, i.e. the cap on concurrent publishes
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
    pub echo_events: bool,
}

impl ForwarderConfig {
    /// The overflow policy has no default and must always be chosen.
    pub fn new(overflow_policy: OverflowPolicy) -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            retry: RetryPolicy::default(),
            echo_events: false,
        }
    }

    pub fn validate(&self) -> Result<(), ForwarderError> {
        if self.max_in_flight == 0 {
            return Err(ForwarderError::InvalidConfig(
                "max_in_flight must be greater than 0".to_string(),
            ));
        }
        // Evicting must always find a queued task, so workers alone may
        // never fill the queue.
        if self.capacity <= self.max_in_flight {
            return Err(ForwarderError::InvalidConfig(format!(
                "queue capacity ({}) must exceed max_in_flight ({})",
                self.capacity, self.max_in_flight
            )));
        }
        Ok(())
    }
}

/// State shared between the forwarder and its workers.
pub(crate) struct Shared<P: Publisher> {
    queue: TaskQueue,
    publisher: Arc<P>,
    topic: Topic,
    retry: RetryPolicy,
    metrics: ForwarderMetrics,
    delivered: AtomicU64,
}

impl<P: Publisher> Shared<P> {
    fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_delivered();
    }

    fn update_queue_depth(&self) {
        self.metrics
            .set_queue_depth(self.queue.metrics().occupancy());
    }
}

pub struct Forwarder<P: Publisher> {
    shared: Arc<Shared<P>>,
    overflow_policy: OverflowPolicy,
    max_in_flight: usize,
    echo_events: bool,
    next_id: AtomicU64,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: Publisher> Forwarder<P> {
    pub fn new(
        publisher: Arc<P>,
        topic: Topic,
        config: ForwarderConfig,
        metrics: ForwarderMetrics,
    ) -> Result<Self, ForwarderError> {
        config.validate()?;
        let queue = TaskQueue::new(config.capacity)?;

        Ok(Self {
            shared: Arc::new(Shared {
                queue,
                publisher,
                topic,
                retry: config.retry,
                metrics,
                delivered: AtomicU64::new(0),
            }),
            overflow_policy: config.overflow_policy,
            max_in_flight: config.max_in_flight,
            echo_events: config.echo_events,
            next_id: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.shared.topic
    }

    pub fn metrics(&self) -> &ForwarderMetrics {
        &self.shared.metrics
    }

    pub fn queue_metrics(&self) -> QueueMetrics {
        self.shared.queue.metrics()
    }

    /// Events delivered by this forwarder so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Spawns the worker pool. Calling it again is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() || self.cancel.is_cancelled() {
            warn!("Forwarder already started");
            return;
        }

        for id in 0..self.max_in_flight {
            let worker = Worker::new(id, self.shared.clone(), self.cancel.clone());
            workers.push(tokio::spawn(worker.run()));
        }

        info!(
            "Forwarder started: {} workers, topic {}, policy {}",
            self.max_in_flight, self.shared.topic, self.overflow_policy
        );
    }

    /// Admits an event for delivery.
    ///
    /// Under the block policy this waits while the queue is full; under the
    /// evict policy it returns at once, pushing out the oldest queued task
    /// when needed. Fails with [`QueueError::Closed`] once draining started,
    /// including for a submit that was blocked when the drain began; such an
    /// event is counted as abandoned.
    pub async fn submit(&self, event: LogEvent) -> Result<PushOutcome, QueueError> {
        if self.echo_events {
            debug!(target: "journal_forwarder::events", "{}", event.to_json());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let outcome = match self
            .shared
            .queue
            .push(PublishTask::new(id, event), self.overflow_policy)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // The event was already read; it counts as lost at shutdown.
                self.shared.metrics.record_dropped(DropReason::Abandoned);
                warn!(task_id = id, "Abandoning event rejected by closed queue");
                return Err(e);
            }
        };

        if let PushOutcome::Evicted(evicted) = &outcome {
            self.shared.metrics.record_dropped(DropReason::Evicted);
            warn!(
                task_id = evicted.id(),
                attempts = evicted.attempts(),
                "Queue full, evicted oldest event"
            );
        }

        self.shared.update_queue_depth();
        Ok(outcome)
    }

    /// Feeds a reader's events into `submit` until the stream ends or the
    /// forwarder stops admitting. Returns the number admitted.
    pub async fn run<S>(&self, mut events: S) -> u64
    where
        S: Stream<Item = LogEvent> + Unpin,
    {
        let mut admitted = 0;
        while let Some(event) = events.next().await {
            match self.submit(event).await {
                Ok(_) => admitted += 1,
                Err(QueueError::Closed) => {
                    info!("Forwarder is draining, no longer admitting events");
                    break;
                }
                Err(e) => {
                    error!("Failed to submit event: {}", e);
                    break;
                }
            }
        }
        admitted
    }

    /// Stops admission and waits up to `timeout` for queued and in-flight
    /// tasks to finish. Returns how many were delivered meanwhile.
    ///
    /// A publish already in progress when the deadline passes is allowed to
    /// complete. Tasks still queued after that are abandoned.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let delivered_before = self.delivered();
        self.shared.queue.close();

        let outstanding = self.shared.queue.metrics().occupancy();
        info!(
            "Draining {} outstanding events (timeout {:?})",
            outstanding, timeout
        );

        if tokio::time::timeout(timeout, self.shared.queue.wait_idle())
            .await
            .is_err()
        {
            warn!(
                "Drain timed out with {} events outstanding",
                self.shared.queue.metrics().occupancy()
            );
        }

        self.cancel.cancel();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                error!("Publish worker failed: {}", e);
            }
        }

        for task in self.shared.queue.abandon() {
            self.shared.metrics.record_dropped(DropReason::Abandoned);
            warn!(
                task_id = task.id(),
                attempts = task.attempts(),
                "Abandoning undelivered event at shutdown"
            );
        }
        self.shared.update_queue_depth();

        let delivered = self.delivered().saturating_sub(delivered_before) as usize;
        info!("Drain finished: {} events delivered", delivered);
        delivered
    }
}

impl<P: Publisher> std::fmt::Debug for Forwarder<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("topic", &self.shared.topic)
            .field("queue", &self.shared.queue)
            .field("overflow_policy", &self.overflow_policy)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}
