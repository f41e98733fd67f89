//! Intervention delivery
//!
//! Sinks that carry decisions to the user, and the retry policy shared by
//! delivery and persistence writes.

pub mod retry;
pub mod sink;

pub use retry::RetryPolicy;
pub use sink::{
    BroadcastSink, DeliveryResult, InterventionSink, LogSink, SharedSink, SinkError, SinkResult,
};
