//! # Event Stream Transport
//!
//! A platform-level abstraction over an append-only event stream with named
//! consumer groups, explicit acknowledgement, and redelivery of unacked
//! messages.
//!
//! ## Why This Lives in Tier 1
//!
//! The stream transport is a **shared runtime capability**: services append
//! serialized events and consume them through durable consumer groups without
//! depending on each other. Placing it in `platform/` allows a config-driven
//! swap between NATS JetStream (production) and an in-memory log (dev/test)
//! with identical observable semantics.
//!
//! ## Implementations
//!
//! - [`JetStreamEventStream`]: production implementation on NATS JetStream
//! - [`InMemoryStream`]: in-process log for tests and local development

mod inmemory_stream;
mod jetstream;

pub use inmemory_stream::InMemoryStream;
pub use jetstream::JetStreamEventStream;

use async_trait::async_trait;
use std::time::Duration;

/// Errors that can occur when using the event stream
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to append to stream: {0}")]
    AppendError(String),

    #[error("failed to fetch from stream: {0}")]
    FetchError(String),

    #[error("failed to acknowledge message: {0}")]
    AckError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

/// Result type for stream operations
pub type BusResult<T> = Result<T, BusError>;

/// Acknowledgement handle for a delivered message
///
/// Dropping the handle without calling [`AckHandle::ack`] leaves the message
/// pending; it will be redelivered to the same consumer group on a later
/// fetch.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(self: Box<Self>) -> BusResult<()>;
}

/// A message fetched from the stream, awaiting acknowledgement
pub struct PendingEvent {
    /// Position of the message in the stream (broker-assigned)
    pub stream_id: String,
    /// The serialized event payload
    pub payload: Vec<u8>,
    ack: Box<dyn AckHandle>,
}

impl PendingEvent {
    pub fn new(stream_id: String, payload: Vec<u8>, ack: Box<dyn AckHandle>) -> Self {
        Self {
            stream_id,
            payload,
            ack,
        }
    }

    /// Acknowledge the message so it is not redelivered
    pub async fn ack(self) -> BusResult<()> {
        self.ack.ack().await
    }
}

impl std::fmt::Debug for PendingEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEvent")
            .field("stream_id", &self.stream_id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Append-only event stream with consumer-group reads
///
/// Semantics required of every implementation:
/// - `append` assigns a stream id that is strictly increasing in append order.
/// - `fetch` delivers each message at-least-once per consumer group: a
///   message is removed from a group's pending set only when acked.
/// - `fetch` blocks for up to `block` when no messages are available.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Append a payload to the stream, returning the assigned stream id
    async fn append(&self, payload: Vec<u8>) -> BusResult<String>;

    /// Fetch up to `batch` messages for the named consumer group
    ///
    /// Returns previously-unacknowledged messages first, then new ones.
    /// An empty result after `block` elapses is not an error.
    async fn fetch(
        &self,
        group: &str,
        batch: usize,
        block: Duration,
    ) -> BusResult<Vec<PendingEvent>>;
}

impl std::fmt::Debug for dyn EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventStream")
    }
}
