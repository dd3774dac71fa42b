//! Fire-and-forget event publisher.
//!
//! Capture must never wait for, or fail because of, the channel. Events are
//! queued on a bounded in-process queue and a background worker serializes
//! and publishes them, logging and dropping anything it cannot deliver.

use super::{ChannelError, EventChannel};
use crate::config::PipelineConfig;
use crate::models::TrackedEvent;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle used by capture to hand events to the publish worker.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<TrackedEvent>,
}

impl EventPublisher {
    /// Creates a publisher and the receiving end of its queue.
    ///
    /// Useful for tests that inspect emitted events directly.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<TrackedEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queues an event for publication without waiting.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::QueueFull` or `ChannelError::Closed`. Callers
    /// log the error; the event is lost.
    pub fn emit(&self, event: TrackedEvent) -> Result<(), ChannelError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(event) => {
                tracing::error!(unique_id = %event.unique_id, "Publish queue full, event dropped");
                ChannelError::QueueFull
            }
            mpsc::error::TrySendError::Closed(event) => {
                tracing::error!(unique_id = %event.unique_id, "Publisher closed, event dropped");
                ChannelError::Closed
            }
        })
    }
}

/// Starts the publish worker for a channel and topic.
///
/// The worker exits once every `EventPublisher` clone has been dropped and
/// the queue is drained.
#[must_use]
pub fn spawn_publisher(
    channel: Arc<dyn EventChannel>,
    topic: impl Into<String>,
    config: &PipelineConfig,
) -> (EventPublisher, JoinHandle<()>) {
    let (publisher, mut receiver) = EventPublisher::bounded(config.publish_queue_capacity);
    let topic = topic.into();
    let timeout = config.publish_timeout();

    let handle = tokio::spawn(async move {
        tracing::info!(topic = %topic, channel = channel.name(), "Event publisher started");

        while let Some(event) = receiver.recv().await {
            if let Err(e) = publish_event(channel.as_ref(), &topic, &event, timeout).await {
                tracing::error!(
                    unique_id = %event.unique_id,
                    service_name = %event.service_name,
                    topic = %topic,
                    error = %e,
                    "Failed to publish tracked event"
                );
            }
        }

        tracing::info!(topic = %topic, "Event publisher stopped");
    });

    (publisher, handle)
}

async fn publish_event(
    channel: &dyn EventChannel,
    topic: &str,
    event: &TrackedEvent,
    timeout: Duration,
) -> Result<(), ChannelError> {
    let payload = Bytes::from(serde_json::to_vec(event)?);

    tokio::time::timeout(timeout, channel.publish(topic, payload))
        .await
        .map_err(|_| ChannelError::Timeout(timeout))??;

    tracing::debug!(unique_id = %event.unique_id, topic, "Tracked event published");
    Ok(())
}
