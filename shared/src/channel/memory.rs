//! In-process event channel backed by tokio broadcast channels.

use super::{ChannelError, EventChannel, Subscription};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// In-memory event channel.
///
/// Each topic is a broadcast channel: every subscriber receives every
/// message published after it subscribed, regardless of its group. Messages
/// published while nobody is subscribed are discarded, and a subscriber that
/// falls more than `capacity` messages behind skips the overflow.
///
/// # Example
///
/// ```
/// use shared::channel::{EventChannel, MemoryChannel};
///
/// # async fn example() -> Result<(), shared::channel::ChannelError> {
/// let channel = MemoryChannel::new(16);
/// let mut sub = channel.subscribe("audit", "group").await?;
///
/// channel.publish("audit", "hello".into()).await?;
/// assert_eq!(sub.next().await?.unwrap(), "hello");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryChannel {
    topics: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    capacity: usize,
}

impl MemoryChannel {
    /// Creates a channel whose topics buffer up to `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> Result<broadcast::Sender<Bytes>, ChannelError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| ChannelError::Connection("memory channel lock poisoned".to_string()))?;

        Ok(topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone())
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventChannel for MemoryChannel {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ChannelError> {
        let sender = self.sender(topic)?;
        if sender.send(payload).is_err() {
            tracing::debug!(topic, "No subscribers, message discarded");
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError> {
        let receiver = self.sender(topic)?.subscribe();
        tracing::debug!(topic, group, "Memory subscription created");
        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            receiver,
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemorySubscription {
    topic: String,
    receiver: broadcast::Receiver<Bytes>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Bytes>, ChannelError> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "Subscriber lagged, messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let channel = MemoryChannel::new(8);
        let mut sub = channel.subscribe("t", "g").await.unwrap();

        channel.publish("t", Bytes::from_static(b"one")).await.unwrap();
        channel.publish("t", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(sub.next().await.unwrap().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(sub.next().await.unwrap().unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let channel = MemoryChannel::new(8);
        assert!(channel.publish("t", Bytes::from_static(b"x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let channel = MemoryChannel::new(8);
        let mut audit = channel.subscribe("audit", "g").await.unwrap();

        channel.publish("other", Bytes::from_static(b"no")).await.unwrap();
        channel.publish("audit", Bytes::from_static(b"yes")).await.unwrap();

        assert_eq!(audit.next().await.unwrap().unwrap(), Bytes::from_static(b"yes"));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_overflow() {
        let channel = MemoryChannel::new(2);
        let mut sub = channel.subscribe("t", "g").await.unwrap();

        for i in 0..5u8 {
            channel.publish("t", Bytes::from(vec![i])).await.unwrap();
        }

        // Only the last `capacity` messages survive
        assert_eq!(sub.next().await.unwrap().unwrap(), Bytes::from(vec![3u8]));
        assert_eq!(sub.next().await.unwrap().unwrap(), Bytes::from(vec![4u8]));
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(MemoryChannel::default().name(), "memory");
    }
}
