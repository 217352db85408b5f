use super::LogSource;
use crate::domain::LogEvent;
use crate::reliability::{Backoff, ForwarderMetrics};
use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Source reconnect backoff: 1s doubling up to 30s.
pub const DEFAULT_RECONNECT_BACKOFF: Backoff =
    Backoff::new(Duration::from_secs(1), Duration::from_secs(30));

/// Events produced by a started [`Reader`]. Ends only after a stop.
pub type ReaderStream = BoxStream<'static, LogEvent>;

/// Stops a started reader from elsewhere.
#[derive(Debug, Clone)]
pub struct ReaderHandle {
    stop: CancellationToken,
}

impl ReaderHandle {
    /// Idempotent.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            debug!("Stopping journal reader");
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// Turns a [`LogSource`] into an endless event stream.
///
/// Source failures are logged and the source is reopened after a capped
/// exponential backoff. The failure count resets on the first successful
/// read, so a source that opens but immediately fails keeps backing off.
pub struct Reader<S: LogSource> {
    source: S,
    backoff: Backoff,
    metrics: ForwarderMetrics,
    stop: CancellationToken,
    failures: u32,
    connected: bool,
}

impl<S: LogSource> Reader<S> {
    pub fn new(source: S, backoff: Backoff, metrics: ForwarderMetrics) -> Self {
        Self {
            source,
            backoff,
            metrics,
            stop: CancellationToken::new(),
            failures: 0,
            connected: false,
        }
    }

    pub fn handle(&self) -> ReaderHandle {
        ReaderHandle {
            stop: self.stop.clone(),
        }
    }

    pub fn stop(&self) {
        self.handle().stop();
    }

    pub fn start(self) -> ReaderStream {
        stream::unfold(self, |mut reader| async move {
            let event = reader.next().await?;
            Some((event, reader))
        })
        .boxed()
    }

    async fn next(&mut self) -> Option<LogEvent> {
        loop {
            if self.stop.is_cancelled() {
                info!("Journal reader stopped");
                return None;
            }

            if !self.connected {
                if self.failures > 0 {
                    let delay = self.backoff.delay(self.failures - 1);
                    info!(
                        "Reconnecting to journal source in {:?} (attempt {})",
                        delay, self.failures
                    );
                    tokio::select! {
                        biased;
                        _ = self.stop.cancelled() => continue,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                let opened = tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => continue,
                    opened = self.source.open() => opened,
                };

                match opened {
                    Ok(()) => self.connected = true,
                    Err(e) => {
                        error!("Failed to open journal source: {}", e);
                        self.mark_disconnected();
                        continue;
                    }
                }
            }

            // A read that already produced an entry wins over a stop.
            let read = tokio::select! {
                biased;
                read = self.source.next_event() => read,
                _ = self.stop.cancelled() => continue,
            };

            match read {
                Ok(Some(event)) => {
                    self.failures = 0;
                    self.metrics.record_event_read();
                    return Some(event);
                }
                Ok(None) => {
                    warn!("Journal source ended");
                    self.mark_disconnected();
                }
                Err(e) => {
                    error!("Journal source error: {}", e);
                    self.mark_disconnected();
                }
            }
        }
    }

    fn mark_disconnected(&mut self) {
        self.connected = false;
        self.failures = self.failures.saturating_add(1);
        self.metrics.record_reconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::SourceError;
    use crate::domain::Severity;
    use chrono::Utc;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    enum Step {
        Event(&'static str),
        Fail,
        End,
    }

    /// Opens fail while `open_failures` lasts; reads follow `steps` and then
    /// wait forever.
    struct ScriptedSource {
        open_failures: u32,
        steps: VecDeque<Step>,
    }

    impl LogSource for ScriptedSource {
        async fn open(&mut self) -> Result<(), SourceError> {
            if self.open_failures > 0 {
                self.open_failures -= 1;
                return Err(SourceError::NotOpen);
            }
            Ok(())
        }

        async fn next_event(&mut self) -> Result<Option<LogEvent>, SourceError> {
            match self.steps.pop_front() {
                Some(Step::Event(message)) => Ok(Some(LogEvent::new(
                    Utc::now(),
                    "test",
                    Severity::Info,
                    message,
                ))),
                Some(Step::Fail) => Err(SourceError::Malformed("broken pipe".into())),
                Some(Step::End) => Ok(None),
                None => std::future::pending().await,
            }
        }
    }

    fn reader(open_failures: u32, steps: Vec<Step>) -> (Reader<ScriptedSource>, ForwarderMetrics) {
        let metrics = ForwarderMetrics::new().unwrap();
        let source = ScriptedSource {
            open_failures,
            steps: steps.into(),
        };
        (
            Reader::new(source, DEFAULT_RECONNECT_BACKOFF, metrics.clone()),
            metrics,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_with_backoff() {
        let (reader, metrics) = reader(
            1,
            vec![Step::Event("a"), Step::Fail, Step::End, Step::Event("b")],
        );
        let mut events = reader.start();
        let start = Instant::now();

        assert_eq!(events.next().await.unwrap().message, "a");
        assert_eq!(events.next().await.unwrap().message, "b");

        // open failure: 1s; read error then end without a read between: 1s + 2s
        assert!(start.elapsed() >= Duration::from_secs(4));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.source_reconnects, 3);
        assert_eq!(snapshot.events_read, 2);
    }

    #[tokio::test]
    async fn test_stop_ends_stream() {
        let (reader, _metrics) = reader(0, vec![Step::Event("a")]);
        let handle = reader.handle();
        let mut events = reader.start();

        assert!(events.next().await.is_some());

        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        assert!(events.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_backoff() {
        let (reader, _metrics) = reader(u32::MAX, Vec::new());
        let handle = reader.handle();
        let consumer = tokio::spawn(async move { reader.start().count().await });

        tokio::time::sleep(Duration::from_secs(120)).await;
        handle.stop();

        assert_eq!(consumer.await.unwrap(), 0);
    }
}
