pub mod http;
pub mod publisher;

pub use http::{ClientError, ConnectionStats, HttpPublisher, PublisherConfig};
pub use publisher::{Ack, DryRunPublisher, PublishError, Publisher};
