use super::Shared;
use crate::buffer::{DropReason, PublishTask};
use crate::reliability::{PublishFailureKind, RetryDecision};
use crate::sender::{PublishError, Publisher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// One delivery slot: pops ready tasks and publishes them one at a time.
pub(crate) struct Worker<P: Publisher> {
    id: usize,
    shared: Arc<Shared<P>>,
    cancel: CancellationToken,
}

impl<P: Publisher> Worker<P> {
    pub(crate) fn new(id: usize, shared: Arc<Shared<P>>, cancel: CancellationToken) -> Self {
        Self { id, shared, cancel }
    }

    pub(crate) async fn run(self) {
        debug!("Publish worker {} started", self.id);

        // A publish in progress is never aborted; cancellation is only
        // observed between tasks.
        while !self.cancel.is_cancelled() {
            let Some(task) = self.shared.queue.pop(&self.cancel).await else {
                break;
            };
            self.process(task).await;
        }

        debug!("Publish worker {} stopped", self.id);
    }

    async fn process(&self, mut task: PublishTask) {
        let shared = &self.shared;
        let attempt = task.record_attempt();
        shared.metrics.record_attempt();

        let result = match task.event().to_payload() {
            Ok(payload) => shared.publisher.publish(shared.topic.as_str(), payload).await,
            Err(e) => Err(PublishError::MalformedPayload(e.to_string())),
        };

        match result {
            Ok(ack) => {
                task.mark_delivered();
                shared.record_delivered();
                debug!(
                    task_id = task.id(),
                    attempt,
                    status = ack.status,
                    "Event delivered"
                );
                shared.queue.complete();
            }
            Err(e) if e.is_retryable() => {
                shared.metrics.record_failure(PublishFailureKind::Retryable);
                match shared.retry.decide(attempt) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            task_id = task.id(),
                            attempt,
                            "Publish failed, retrying in {:?}: {}",
                            delay,
                            e
                        );
                        shared.metrics.record_retry_scheduled();
                        shared.queue.requeue(task, delay);
                    }
                    RetryDecision::GiveUp => self.drop_task(task, DropReason::RetriesExhausted, &e),
                }
            }
            Err(e) => {
                shared.metrics.record_failure(PublishFailureKind::Fatal);
                self.drop_task(task, DropReason::Fatal, &e);
            }
        }

        shared.update_queue_depth();
    }

    fn drop_task(&self, mut task: PublishTask, reason: DropReason, cause: &PublishError) {
        task.mark_dropped(reason);
        self.shared.metrics.record_dropped(reason);
        error!(
            task_id = task.id(),
            attempts = task.attempts(),
            reason = %reason,
            source = %task.event().source,
            "Dropping event: {}",
            cause
        );
        self.shared.queue.complete();
    }
}
