use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Invalid queue capacity: {capacity}")]
    InvalidCapacity { capacity: usize },

    #[error("Queue is closed")]
    Closed,
}
