pub mod backpressure;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod task;

pub use backpressure::{BackpressureLevel, OverflowPolicy};
pub use error::QueueError;
pub use metrics::QueueMetrics;
pub use queue::{PushOutcome, TaskQueue};
pub use task::{DropReason, PublishTask, TaskState};
