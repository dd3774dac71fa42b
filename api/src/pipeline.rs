//! Audit pipeline wiring.
//!
//! Connects the configured event channel and record store, starts the
//! publisher worker and, when enabled, the persistence consumer.

use anyhow::{Context, Result};
use shared::capture::EventCapture;
use shared::channel::{spawn_publisher, EventChannel, MemoryChannel, NatsChannel, NatsConfig};
use shared::config::PipelineConfig;
use shared::consumer::{ConsumerHandle, PersistenceConsumer};
use shared::storage::{InMemoryRecordStore, RecordStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{ChannelKind, Config, StoreKind};
use crate::db::{Database, DatabaseConfig};
use crate::state::AppState;

/// Running audit pipeline.
pub struct Pipeline {
    state: AppState,
    publisher: JoinHandle<()>,
    consumer: Option<ConsumerHandle>,
}

impl Pipeline {
    /// Builds the pipeline described by the server configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel or the store cannot be reached, or
    /// the consumer cannot subscribe.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let channel: Arc<dyn EventChannel> = match config.channel {
            ChannelKind::Memory => Arc::new(MemoryChannel::new(config.pipeline.publish_queue_capacity)),
            ChannelKind::Nats => {
                let nats = NatsConfig {
                    url: config.nats_url.clone(),
                    stream_name: config.nats_stream.clone(),
                    subjects: vec![config.pipeline.topic.clone()],
                    ..NatsConfig::default()
                };
                Arc::new(
                    NatsChannel::connect(&nats)
                        .await
                        .context("Failed to connect to NATS")?,
                )
            }
        };

        let store: Option<Arc<dyn RecordStore>> = match config.store {
            StoreKind::Memory => Some(InMemoryRecordStore::new_shared()),
            StoreKind::ClickHouse => {
                let db = Database::new(&DatabaseConfig::from_env());
                Some(db.prepare().await?)
            }
            StoreKind::None => None,
        };

        Self::start(channel, store, &config.pipeline, config.max_body_bytes).await
    }

    /// Builds a pipeline on an in-memory channel and store.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot subscribe.
    pub async fn in_memory(pipeline: &PipelineConfig, max_body_bytes: usize) -> Result<Self> {
        Self::start(
            Arc::new(MemoryChannel::new(pipeline.publish_queue_capacity)),
            Some(InMemoryRecordStore::new_shared()),
            pipeline,
            max_body_bytes,
        )
        .await
    }

    /// Starts the publisher and consumer over the given collaborators.
    ///
    /// The consumer subscribes before the publisher accepts events.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot subscribe.
    pub async fn start(
        channel: Arc<dyn EventChannel>,
        store: Option<Arc<dyn RecordStore>>,
        pipeline: &PipelineConfig,
        max_body_bytes: usize,
    ) -> Result<Self> {
        let consumer = match PersistenceConsumer::build(pipeline, store.clone()) {
            Some(consumer) => Some(
                consumer
                    .start(Arc::clone(&channel))
                    .await
                    .context("Failed to start persistence consumer")?,
            ),
            None => None,
        };

        let (publisher, publisher_task) =
            spawn_publisher(Arc::clone(&channel), pipeline.topic.clone(), pipeline);

        tracing::info!(
            channel = channel.name(),
            topic = %pipeline.topic,
            store = store.is_some(),
            consumer = consumer.is_some(),
            "Audit pipeline started"
        );

        Ok(Self {
            state: AppState::new(EventCapture::new(publisher), store, max_body_bytes),
            publisher: publisher_task,
            consumer,
        })
    }

    /// Application state bound to this pipeline.
    #[must_use]
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Stops the pipeline.
    ///
    /// Queued events are published if every other handle to the state has
    /// been dropped; the wait is bounded by `drain_timeout`.
    pub async fn shutdown(self, drain_timeout: Duration) {
        let Self {
            state,
            publisher,
            consumer,
        } = self;
        drop(state);

        if tokio::time::timeout(drain_timeout, publisher).await.is_err() {
            tracing::warn!("Publisher did not drain before shutdown");
        }

        if let Some(consumer) = consumer {
            consumer.shutdown();
            consumer.join().await;
        }

        tracing::info!("Audit pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::capture::TrackSpec;
    use shared::models::ReverseSentenceResponse;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_in_memory_pipeline_persists_captured_calls() {
        let pipeline = Pipeline::in_memory(&PipelineConfig::default(), 1024)
            .await
            .unwrap();
        let state = pipeline.state();

        let id = state
            .capture()
            .begin(&TrackSpec::new("ReverseWordsService"), b"")
            .complete(&ReverseSentenceResponse::default());

        for _ in 0..200 {
            if state.store().unwrap().get(&id).unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(state.store().unwrap().get(&id).unwrap().is_some());

        drop(state);
        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_pipeline_without_store_has_no_consumer() {
        let config = Config {
            store: StoreKind::None,
            ..Config::default()
        };

        let pipeline = Pipeline::from_config(&config).await.unwrap();
        assert!(pipeline.consumer.is_none());
        assert!(pipeline.state().store().is_none());
    }

    #[tokio::test]
    async fn test_pipeline_consumer_disabled() {
        let pipeline_config = PipelineConfig {
            consumer_enabled: false,
            ..PipelineConfig::default()
        };

        let pipeline = Pipeline::in_memory(&pipeline_config, 1024).await.unwrap();
        assert!(pipeline.consumer.is_none());
        assert!(pipeline.state().store().is_some());
    }
}
