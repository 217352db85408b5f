use super::backpressure::{BackpressureLevel, OverflowPolicy};
use super::error::QueueError;
use super::metrics::QueueMetrics;
use super::task::{DropReason, PublishTask};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;

// Prevent excessive memory allocation
const MAX_CAPACITY: usize = 10_000_000;

#[derive(Debug)]
pub enum PushOutcome {
    Enqueued,
    /// The new task was admitted by pushing this one out
    Evicted(PublishTask),
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<PublishTask>,
    in_flight: usize,
    closed: bool,
}

impl QueueState {
    fn occupancy(&self) -> usize {
        self.pending.len() + self.in_flight
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}

/// Bounded FIFO of publish tasks shared by the submitter and the workers.
///
/// A slot is held from admission until the task reaches a terminal state,
/// so in-flight and retry-parked tasks count against capacity. Requeueing
/// therefore never needs a free slot and cannot deadlock the workers.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    capacity: usize,

    items: Notify,
    space: Notify,
    idle: Notify,

    pushed: AtomicU64,
    popped: AtomicU64,
    requeued: AtomicU64,
    evicted: AtomicU64,
    peak_occupancy: AtomicUsize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(QueueError::InvalidCapacity { capacity });
        }

        Ok(Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::with_capacity(capacity.min(4096)),
                in_flight: 0,
                closed: false,
            }),
            capacity,
            items: Notify::new(),
            space: Notify::new(),
            idle: Notify::new(),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            peak_occupancy: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks waiting in the queue (ready or parked for a retry).
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }

    /// Admits a task, applying `policy` when every slot is taken.
    ///
    /// Eviction removes the queued task admitted earliest, which may be a
    /// retry parked behind newer tasks.
    pub async fn push(
        &self,
        task: PublishTask,
        policy: OverflowPolicy,
    ) -> Result<PushOutcome, QueueError> {
        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }

                if state.occupancy() < self.capacity {
                    self.admit(&mut state, task);
                    return Ok(PushOutcome::Enqueued);
                }

                // In-flight tasks cannot be evicted; fall through to waiting
                // if nothing is queued. Parked retries sit behind newer
                // tasks, so the oldest is found by admission time.
                if policy == OverflowPolicy::Evict
                    && let Some(index) = state
                        .pending
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, task)| task.enqueued_at())
                        .map(|(index, _)| index)
                    && let Some(mut oldest) = state.pending.remove(index)
                {
                    oldest.mark_dropped(DropReason::Evicted);
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    self.admit(&mut state, task);
                    return Ok(PushOutcome::Evicted(oldest));
                }
            }

            space.await;
        }
    }

    fn admit(&self, state: &mut QueueState, task: PublishTask) {
        state.pending.push_back(task);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.update_peak(state.occupancy());
        self.items.notify_one();
    }

    /// Takes the oldest ready task, waiting for one to be submitted or for a
    /// parked retry to come due.
    ///
    /// Returns `None` when `cancel` fires, or once the queue is closed and
    /// nothing is left waiting.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<PublishTask> {
        loop {
            let notified = self.items.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_ready = {
                let mut state = self.state.lock();
                let now = Instant::now();

                if let Some(index) = state.pending.iter().position(|task| task.is_ready(now))
                    && let Some(mut task) = state.pending.remove(index)
                {
                    state.in_flight += 1;
                    task.mark_in_flight();
                    self.popped.fetch_add(1, Ordering::Relaxed);
                    return Some(task);
                }

                if state.closed && state.pending.is_empty() {
                    return None;
                }

                state.pending.iter().map(PublishTask::ready_at).min()
            };

            match next_ready {
                Some(deadline) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = notified.as_mut() => {}
                        _ = sleep_until(deadline) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = notified.as_mut() => {}
                    }
                }
            }
        }
    }

    /// Parks an in-flight task at the back of the queue until `delay` has
    /// elapsed. The task keeps its slot.
    pub fn requeue(&self, mut task: PublishTask, delay: Duration) {
        task.schedule_retry(delay);
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.pending.push_back(task);
        }
        self.requeued.fetch_add(1, Ordering::Relaxed);
        self.items.notify_one();
    }

    /// Releases the slot of an in-flight task that reached a terminal state.
    pub fn complete(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.is_idle()
        };

        self.space.notify_one();
        if idle {
            self.idle.notify_waiters();
        }
    }

    /// Stops admitting new tasks. Queued tasks are still handed out.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.items.notify_waiters();
        self.space.notify_waiters();
    }

    /// Removes every waiting task. In-flight tasks are left to their workers.
    pub fn abandon(&self) -> Vec<PublishTask> {
        let (abandoned, idle) = {
            let mut state = self.state.lock();
            let abandoned: Vec<PublishTask> = state
                .pending
                .drain(..)
                .map(|mut task| {
                    task.mark_dropped(DropReason::Abandoned);
                    task
                })
                .collect();
            (abandoned, state.is_idle())
        };

        if !abandoned.is_empty() {
            self.space.notify_waiters();
        }
        if idle {
            self.idle.notify_waiters();
        }
        abandoned
    }

    /// Resolves once nothing is queued or in flight.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.is_idle() {
                return;
            }

            idle.await;
        }
    }

    fn update_peak(&self, occupancy: usize) {
        let mut peak = self.peak_occupancy.load(Ordering::Relaxed);
        while occupancy > peak {
            match self.peak_occupancy.compare_exchange_weak(
                peak,
                occupancy,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => peak = x,
            }
        }
    }

    pub fn metrics(&self) -> QueueMetrics {
        let (pending, in_flight) = {
            let state = self.state.lock();
            (state.pending.len(), state.in_flight)
        };

        QueueMetrics {
            capacity: self.capacity,
            pending,
            in_flight,
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            peak_occupancy: self.peak_occupancy.load(Ordering::Relaxed),
        }
    }

    pub fn backpressure_level(&self) -> BackpressureLevel {
        BackpressureLevel::from_fill_ratio(self.metrics().fill_ratio())
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let metrics = self.metrics();
        f.debug_struct("TaskQueue")
            .field("capacity", &self.capacity)
            .field("pending", &metrics.pending)
            .field("in_flight", &metrics.in_flight)
            .field("pushed", &metrics.pushed)
            .field("evicted", &metrics.evicted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TaskState;
    use crate::domain::{LogEvent, Severity};
    use chrono::Utc;
    use tokio_test::task::spawn;
    use tokio_test::{assert_pending, assert_ready, assert_ready_ok};

    fn task(id: u64) -> PublishTask {
        PublishTask::new(
            id,
            LogEvent::new(Utc::now(), "test", Severity::Info, format!("event {id}")),
        )
    }

    #[test]
    fn test_rejects_invalid_capacity() {
        assert_eq!(
            TaskQueue::new(0).unwrap_err(),
            QueueError::InvalidCapacity { capacity: 0 }
        );
        assert!(TaskQueue::new(MAX_CAPACITY + 1).is_err());
    }

    #[tokio::test]
    async fn test_fifo_order_for_fresh_tasks() {
        let queue = TaskQueue::new(8).unwrap();
        let cancel = CancellationToken::new();

        for id in 0..3 {
            queue.push(task(id), OverflowPolicy::Block).await.unwrap();
        }

        for expected in 0..3 {
            let popped = queue.pop(&cancel).await.unwrap();
            assert_eq!(popped.id(), expected);
            assert_eq!(popped.state(), TaskState::InFlight);
            queue.complete();
        }
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_evict_policy_drops_oldest() {
        let queue = TaskQueue::new(2).unwrap();

        queue.push(task(1), OverflowPolicy::Evict).await.unwrap();
        queue.push(task(2), OverflowPolicy::Evict).await.unwrap();
        let outcome = queue.push(task(3), OverflowPolicy::Evict).await.unwrap();

        match outcome {
            PushOutcome::Evicted(evicted) => {
                assert_eq!(evicted.id(), 1);
                assert_eq!(evicted.state(), TaskState::Dropped(DropReason::Evicted));
            }
            PushOutcome::Enqueued => panic!("expected eviction"),
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.metrics().evicted, 1);
    }

    #[test]
    fn test_block_policy_waits_for_slot() {
        let queue = TaskQueue::new(1).unwrap();
        let cancel = CancellationToken::new();
        assert_ready_ok!(spawn(queue.push(task(1), OverflowPolicy::Block)).poll());

        let mut blocked = spawn(queue.push(task(2), OverflowPolicy::Block));
        assert_pending!(blocked.poll());

        // Popping alone does not free the slot; completion does.
        let first = assert_ready!(spawn(queue.pop(&cancel)).poll()).unwrap();
        assert!(!blocked.is_woken());
        assert_pending!(blocked.poll());

        drop(first);
        queue.complete();
        assert!(blocked.is_woken());
        assert!(matches!(
            assert_ready_ok!(blocked.poll()),
            PushOutcome::Enqueued
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_prefers_parked_retry_admitted_earlier() {
        let queue = TaskQueue::new(3).unwrap();
        let cancel = CancellationToken::new();

        queue.push(task(1), OverflowPolicy::Evict).await.unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        queue.push(task(2), OverflowPolicy::Evict).await.unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;

        // Task 1 fails and is parked behind task 2.
        let first = queue.pop(&cancel).await.unwrap();
        queue.requeue(first, Duration::from_secs(5));
        queue.push(task(3), OverflowPolicy::Evict).await.unwrap();

        match queue.push(task(4), OverflowPolicy::Evict).await.unwrap() {
            PushOutcome::Evicted(evicted) => assert_eq!(evicted.id(), 1),
            PushOutcome::Enqueued => panic!("expected eviction"),
        }
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeued_task_waits_for_delay() {
        let queue = TaskQueue::new(4).unwrap();
        let cancel = CancellationToken::new();

        queue.push(task(1), OverflowPolicy::Block).await.unwrap();
        let first = queue.pop(&cancel).await.unwrap();
        queue.requeue(first, Duration::from_secs(2));
        queue.push(task(2), OverflowPolicy::Block).await.unwrap();

        // The fresh task overtakes the parked retry.
        let next = queue.pop(&cancel).await.unwrap();
        assert_eq!(next.id(), 2);
        queue.complete();

        let start = Instant::now();
        let retried = queue.pop(&cancel).await.unwrap();
        assert_eq!(retried.id(), 1);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_close_rejects_push_and_ends_pop() {
        let queue = TaskQueue::new(4).unwrap();
        let cancel = CancellationToken::new();

        queue.close();
        assert_eq!(
            queue.push(task(1), OverflowPolicy::Block).await.unwrap_err(),
            QueueError::Closed
        );
        assert!(queue.pop(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_pop_returns_none_on_cancel() {
        let queue = TaskQueue::new(4).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(queue.pop(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_abandon_marks_tasks_and_goes_idle() {
        let queue = TaskQueue::new(4).unwrap();
        queue.push(task(1), OverflowPolicy::Block).await.unwrap();
        queue.push(task(2), OverflowPolicy::Block).await.unwrap();

        let abandoned = queue.abandon();
        assert_eq!(abandoned.len(), 2);
        assert!(
            abandoned
                .iter()
                .all(|t| t.state() == TaskState::Dropped(DropReason::Abandoned))
        );
        queue.wait_idle().await;
    }
}
