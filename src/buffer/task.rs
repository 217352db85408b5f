use crate::domain::LogEvent;
use std::fmt;
use tokio::time::{Duration, Instant};

/// Lifecycle of a publish task.
///
/// `Pending -> InFlight -> {Delivered | Requeued (back to Pending) | Dropped}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
    Requeued,
    Delivered,
    Dropped(DropReason),
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Delivered | TaskState::Dropped(_))
    }
}

/// Why a task left the pipeline without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Pushed out of a full queue under the evict policy
    Evicted,
    /// Retryable failures until max attempts was reached
    RetriesExhausted,
    /// Non-retryable publish error
    Fatal,
    /// Still queued when the drain deadline passed
    Abandoned,
}

impl DropReason {
    pub const ALL: [DropReason; 4] = [
        DropReason::Evicted,
        DropReason::RetriesExhausted,
        DropReason::Fatal,
        DropReason::Abandoned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Evicted => "evicted",
            DropReason::RetriesExhausted => "retries_exhausted",
            DropReason::Fatal => "fatal",
            DropReason::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event's delivery bookkeeping.
///
/// A task is owned by exactly one place at a time: the queue while it
/// waits, or a single worker while it is in flight. That ownership is what
/// rules out two concurrent publishes of the same task.
#[derive(Debug)]
pub struct PublishTask {
    id: u64,
    event: LogEvent,
    attempts: u32,
    enqueued_at: Instant,
    ready_at: Instant,
    state: TaskState,
}

impl PublishTask {
    pub fn new(id: u64, event: LogEvent) -> Self {
        let now = Instant::now();
        Self {
            id,
            event,
            attempts: 0,
            enqueued_at: now,
            ready_at: now,
            state: TaskState::Pending,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event(&self) -> &LogEvent {
        &self.event
    }

    pub fn into_event(self) -> LogEvent {
        self.event
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.ready_at <= now
    }

    pub(crate) fn mark_in_flight(&mut self) {
        self.state = TaskState::InFlight;
    }

    /// Counts one publish call against this task.
    pub(crate) fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) fn schedule_retry(&mut self, delay: Duration) {
        self.state = TaskState::Requeued;
        self.ready_at = Instant::now() + delay;
    }

    pub(crate) fn mark_delivered(&mut self) {
        self.state = TaskState::Delivered;
    }

    pub(crate) fn mark_dropped(&mut self, reason: DropReason) {
        self.state = TaskState::Dropped(reason);
    }
}
