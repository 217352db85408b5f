pub mod journal;
pub mod reader;

use crate::domain::LogEvent;
use std::future::Future;
use thiserror::Error;

pub use journal::{JournalConfig, JournalRecord, JournalctlSource, parse_journal_line};
pub use reader::{Reader, ReaderHandle, ReaderStream};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Source is not open")]
    NotOpen,
    #[error("Malformed journal entry: {0}")]
    Malformed(String),
}

/// A local source of structured log entries.
///
/// `next_event` must be cancel safe: the reader drops a pending read when
/// it is stopped, and no entry may be lost by that.
pub trait LogSource: Send + 'static {
    /// Opens the source, or reopens it after a failure.
    fn open(&mut self) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Waits for the next entry. `Ok(None)` means the source ended and has
    /// to be reopened.
    fn next_event(&mut self) -> impl Future<Output = Result<Option<LogEvent>, SourceError>> + Send;
}
