//! Persistence consumer: event channel → record store.
//!
//! The consumer subscribes to the event topic and writes every delivered
//! event to the [`RecordStore`]. Writes run on blocking workers with a bounded
//! pool so slow storage never stalls the delivery loop. A failed or timed out
//! write is logged and handed to a [`DeadLetterSink`]; it is never retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;

use crate::channel::{ChannelError, EventChannel, Subscription};
use crate::config::PipelineConfig;
use crate::models::{PersistedRecord, TrackedEvent};
use crate::storage::RecordStore;

const MAX_RECEIVE_BACKOFF: Duration = Duration::from_secs(5);

/// A record whose write failed.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The record that was not stored.
    pub record: PersistedRecord,
    /// Why the write failed.
    pub reason: String,
    /// When the write was abandoned.
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Creates a dead letter stamped with the current time.
    #[must_use]
    pub fn new(record: PersistedRecord, reason: impl Into<String>) -> Self {
        Self {
            record,
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Destination for records that could not be persisted.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Receives a failed record.
    async fn handle(&self, letter: DeadLetter);
}

/// Sink that drops dead letters. The failure has already been logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardDeadLetters;

#[async_trait]
impl DeadLetterSink for DiscardDeadLetters {
    async fn handle(&self, letter: DeadLetter) {
        tracing::debug!(unique_id = %letter.record.unique_id, "Dead letter discarded");
    }
}

/// In-memory dead letter sink for development and testing.
///
/// Keeps at most `max_letters` entries, dropping the oldest.
#[derive(Debug)]
pub struct MemoryDeadLetters {
    letters: RwLock<Vec<DeadLetter>>,
    max_letters: usize,
}

impl MemoryDeadLetters {
    /// Creates a sink holding at most `max_letters` entries.
    #[must_use]
    pub fn new(max_letters: usize) -> Self {
        Self {
            letters: RwLock::new(Vec::new()),
            max_letters,
        }
    }

    /// Number of dead letters held.
    pub async fn count(&self) -> usize {
        self.letters.read().await.len()
    }

    /// Most recent dead letters, newest first.
    pub async fn list(&self, limit: usize) -> Vec<DeadLetter> {
        self.letters
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for MemoryDeadLetters {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn handle(&self, letter: DeadLetter) {
        tracing::warn!(
            unique_id = %letter.record.unique_id,
            reason = %letter.reason,
            "Record dead-lettered"
        );

        let mut letters = self.letters.write().await;
        letters.push(letter);

        if self.max_letters > 0 && letters.len() > self.max_letters {
            let overflow = letters.len() - self.max_letters;
            letters.drain(..overflow);
        }
    }
}

/// Subscriber that persists tracked events.
pub struct PersistenceConsumer {
    store: Arc<dyn RecordStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    topic: String,
    group: String,
    workers: Arc<Semaphore>,
    store_timeout: Duration,
}

impl std::fmt::Debug for PersistenceConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceConsumer")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl PersistenceConsumer {
    /// Builds the consumer if it is enabled and a store is available.
    ///
    /// Returns `None` otherwise; no subscription is made and events stay
    /// with the broker.
    #[must_use]
    pub fn build(config: &PipelineConfig, store: Option<Arc<dyn RecordStore>>) -> Option<Self> {
        if !config.consumer_enabled {
            tracing::info!("Persistence consumer disabled by configuration");
            return None;
        }

        let Some(store) = store else {
            tracing::info!("No record store configured, persistence consumer not started");
            return None;
        };

        Some(Self {
            store,
            dead_letters: Arc::new(DiscardDeadLetters),
            topic: config.topic.clone(),
            group: config.consumer_group.clone(),
            workers: Arc::new(Semaphore::new(config.persist_workers.max(1))),
            store_timeout: config.store_timeout(),
        })
    }

    /// Routes failed writes to `sink`.
    #[must_use]
    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = sink;
        self
    }

    /// Subscribes to the topic and starts the delivery loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be created.
    pub async fn start(self, channel: Arc<dyn EventChannel>) -> Result<ConsumerHandle, ChannelError> {
        let subscription = channel.subscribe(&self.topic, &self.group).await?;

        tracing::info!(
            topic = %self.topic,
            group = %self.group,
            channel = channel.name(),
            "Persistence consumer started"
        );

        let task = tokio::spawn(self.run(subscription));
        Ok(ConsumerHandle { task })
    }

    async fn run(self, mut subscription: Box<dyn Subscription>) {
        let mut failures: u32 = 0;

        loop {
            match subscription.next().await {
                Ok(Some(payload)) => {
                    failures = 0;
                    self.dispatch(payload).await;
                }
                Ok(None) => {
                    tracing::info!(topic = %self.topic, "Subscription closed, consumer stopping");
                    break;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let backoff = receive_backoff(failures);
                    tracing::error!(
                        topic = %self.topic,
                        error = %e,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "Failed to receive event"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn dispatch(&self, payload: Bytes) {
        let event: TrackedEvent = match serde_json::from_slice(&payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(topic = %self.topic, error = %e, "Undecodable event dropped");
                return;
            }
        };
        let record = PersistedRecord::from_event(event);

        let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await else {
            return;
        };

        let store = Arc::clone(&self.store);
        let dead_letters = Arc::clone(&self.dead_letters);
        let timeout = self.store_timeout;

        tokio::spawn(async move {
            let write = tokio::task::spawn_blocking({
                let record = record.clone();
                move || {
                    let _permit = permit;
                    store.upsert(record)
                }
            });

            let outcome = match tokio::time::timeout(timeout, write).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(e.to_string()),
                Ok(Err(e)) => Err(format!("store worker failed: {e}")),
                Err(_) => Err(format!("store write timed out after {timeout:?}")),
            };

            match outcome {
                Ok(()) => {
                    tracing::debug!(unique_id = %record.unique_id, "Record persisted");
                }
                Err(reason) => {
                    tracing::error!(
                        unique_id = %record.unique_id,
                        reason = %reason,
                        "Failed to persist record"
                    );
                    dead_letters.handle(DeadLetter::new(record, reason)).await;
                }
            }
        });
    }
}

fn receive_backoff(failures: u32) -> Duration {
    let millis = 100u64.saturating_mul(1u64 << failures.min(6));
    Duration::from_millis(millis).min(MAX_RECEIVE_BACKOFF)
}

/// Handle to a running consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Stops the delivery loop. Writes already in flight complete.
    pub fn shutdown(&self) {
        self.task.abort();
    }

    /// Returns true once the delivery loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the delivery loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                tracing::error!(error = %e, "Persistence consumer task failed");
            }
        }
    }
}
