//! Domain layer for journal-forwarder.
//!
//! Contains the canonical types shared across all modules:
//! - `LogEvent`: one structured journal record, the pipeline's core data type
//! - `Severity`: syslog priority of an event (emerg..debug)
//! - `Topic`: the pub/sub topic events are published on

pub mod log_event;
pub mod severity;
pub mod topic;

pub use log_event::LogEvent;
pub use severity::Severity;
pub use topic::Topic;
