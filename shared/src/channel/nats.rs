//! NATS `JetStream` event channel.
//!
//! Publishing waits for the `JetStream` acknowledgement, so a successful
//! publish means the broker has stored the message. Consumer groups map to
//! durable pull consumers; members of the same group share deliveries.

use super::{ChannelError, EventChannel, Subscription};
use async_nats::jetstream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;

/// Connection settings for [`NatsChannel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL.
    pub url: String,
    /// `JetStream` stream holding tracked events.
    pub stream_name: String,
    /// Subjects captured by the stream.
    pub subjects: Vec<String>,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "TRACKLOG".to_string(),
            subjects: vec![crate::config::DEFAULT_TOPIC.to_string()],
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

/// Event channel backed by a NATS `JetStream` stream.
pub struct NatsChannel {
    jetstream: jetstream::Context,
    stream: Mutex<jetstream::stream::Stream>,
    stream_name: String,
}

impl std::fmt::Debug for NatsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsChannel")
            .field("stream_name", &self.stream_name)
            .finish_non_exhaustive()
    }
}

impl NatsChannel {
    /// Connects to NATS and creates the stream if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Connection` if the server is unreachable or the
    /// stream cannot be created.
    pub async fn connect(config: &NatsConfig) -> Result<Self, ChannelError> {
        let client = async_nats::ConnectOptions::new()
            .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
            .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)))
            .connect(&config.url)
            .await
            .map_err(|e| ChannelError::Connection(format!("{}: {e}", config.url)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let jetstream = jetstream::new(client);
        let stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream_name.clone(),
                subjects: config.subjects.clone(),
                storage: jetstream::stream::StorageType::File,
                retention: jetstream::stream::RetentionPolicy::Limits,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                ChannelError::Connection(format!(
                    "failed to create stream '{}': {e}",
                    config.stream_name
                ))
            })?;

        tracing::info!(
            stream = %config.stream_name,
            subjects = ?config.subjects,
            "JetStream stream ready"
        );

        Ok(Self {
            jetstream,
            stream: Mutex::new(stream),
            stream_name: config.stream_name.clone(),
        })
    }
}

#[async_trait]
impl EventChannel for NatsChannel {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ChannelError> {
        let publish_error = |reason: String| ChannelError::Publish {
            topic: topic.to_string(),
            reason,
        };

        let ack = self
            .jetstream
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| publish_error(e.to_string()))?
            .await
            .map_err(|e| publish_error(format!("ack failed: {e}")))?;

        tracing::debug!(topic, sequence = ack.sequence, "Message published");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError> {
        let subscribe_error = |reason: String| ChannelError::Subscribe {
            topic: topic.to_string(),
            reason,
        };

        let consumer = self
            .stream
            .lock()
            .await
            .get_or_create_consumer(
                group,
                jetstream::consumer::pull::Config {
                    durable_name: Some(group.to_string()),
                    filter_subject: topic.to_string(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| subscribe_error(format!("durable consumer '{group}': {e}")))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;

        tracing::info!(
            stream = %self.stream_name,
            consumer = group,
            filter = topic,
            "Durable subscription created"
        );

        Ok(Box::new(NatsSubscription {
            topic: topic.to_string(),
            messages,
        }))
    }

    fn name(&self) -> &str {
        "nats"
    }
}

struct NatsSubscription {
    topic: String,
    messages: jetstream::consumer::pull::Stream,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<Bytes>, ChannelError> {
        let Some(message) = self.messages.next().await else {
            return Ok(None);
        };

        let message = message.map_err(|e| ChannelError::Subscribe {
            topic: self.topic.clone(),
            reason: e.to_string(),
        })?;

        // At-most-once: acknowledge on receipt, before processing
        if let Err(e) = message.ack().await {
            tracing::warn!(topic = %self.topic, error = %e, "Failed to acknowledge message");
        }

        Ok(Some(message.payload.clone()))
    }
}
