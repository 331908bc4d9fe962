//! Result publishing and text realization for presentation layers.

pub mod publisher;
pub mod realizer;

pub use publisher::{BroadcastPublisher, NullPublisher, PublishedEvent, ResultPublisher, TracingPublisher};
