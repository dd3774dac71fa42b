//! Event channel: asynchronous publish/subscribe transport for tracked events.
//!
//! The `EventChannel` trait abstracts the broker. Producers never talk to it
//! directly: capture hands events to an [`EventPublisher`], whose worker task
//! serializes them and publishes under the configured topic. Delivery is
//! best-effort and at-most-once; failures are logged and the event dropped.
//!
//! # Transports
//!
//! - [`MemoryChannel`] - in-process broadcast, for development and tests
//! - [`NatsChannel`] - NATS `JetStream`, durable across process restarts

mod memory;
mod nats;
mod publisher;

pub use memory::MemoryChannel;
pub use nats::{NatsChannel, NatsConfig};
pub use publisher::{spawn_publisher, EventPublisher};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur on the event channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Broker connection failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport rejected a publish.
    #[error("Failed to publish to topic '{topic}': {reason}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Transport failure.
        reason: String,
    },

    /// A subscription could not be created or read.
    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscribe {
        /// Source topic.
        topic: String,
        /// Transport failure.
        reason: String,
    },

    /// The event could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The in-process publish queue is full.
    #[error("Publish queue is full")]
    QueueFull,

    /// The publisher worker has stopped.
    #[error("Publisher is closed")]
    Closed,

    /// The publish did not complete in time.
    #[error("Publish timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Core trait for event transports.
///
/// Messages are opaque serialized events. Publishing returns once the
/// transport has accepted the message; it never waits for consumers.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Publishes a message under a topic.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ChannelError>;

    /// Subscribes to a topic as a member of a consumer group.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError>;

    /// Transport name (e.g., "memory", "nats").
    fn name(&self) -> &str;
}

/// Async handle for receiving messages from a topic.
#[async_trait]
pub trait Subscription: Send {
    /// Receives the next message. `Ok(None)` means the subscription ended.
    async fn next(&mut self) -> Result<Option<Bytes>, ChannelError>;
}
