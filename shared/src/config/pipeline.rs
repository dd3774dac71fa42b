//! Audit pipeline configuration.
//!
//! Settings shared by the capture side (publish queue and timeout) and the
//! persistence side (topic, consumer group, worker pool, store timeout).

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default topic carrying tracked events.
pub const DEFAULT_TOPIC: &str = "words.track.aspect";

/// Default consumer group of the persistence consumer.
pub const DEFAULT_CONSUMER_GROUP: &str = "tracklog-persist";

/// Errors produced while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("Invalid value '{value}' for {name}")]
    InvalidValue {
        /// Variable name.
        name: String,
        /// Raw value.
        value: String,
    },

    /// A setting is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration of the capture → publish → persist pipeline.
///
/// # Example
///
/// ```
/// use shared::config::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.topic, "words.track.aspect");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Topic tracked events are published to.
    pub topic: String,

    /// Feature flag for the persistence consumer.
    pub consumer_enabled: bool,

    /// Consumer group (durable consumer name) of the persistence consumer.
    pub consumer_group: String,

    /// Capacity of the in-process publish queue.
    pub publish_queue_capacity: usize,

    /// Upper bound on a single publish, in milliseconds.
    pub publish_timeout_ms: u64,

    /// Maximum concurrent store writes.
    pub persist_workers: usize,

    /// Upper bound on a single store write, in milliseconds.
    pub store_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            consumer_enabled: true,
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            publish_queue_capacity: 1024,
            publish_timeout_ms: 5000,
            persist_workers: 4,
            store_timeout_ms: 5000,
        }
    }
}

impl PipelineConfig {
    /// Loads the configuration from environment variables, falling back to
    /// defaults for unset variables.
    ///
    /// - `TRACKLOG_TOPIC`
    /// - `TRACKLOG_CONSUMER_ENABLED`
    /// - `TRACKLOG_CONSUMER_GROUP`
    /// - `TRACKLOG_PUBLISH_QUEUE`
    /// - `TRACKLOG_PUBLISH_TIMEOUT_MS`
    /// - `TRACKLOG_PERSIST_WORKERS`
    /// - `TRACKLOG_STORE_TIMEOUT_MS`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            topic: std::env::var("TRACKLOG_TOPIC").unwrap_or(defaults.topic),
            consumer_enabled: env_parse("TRACKLOG_CONSUMER_ENABLED")?
                .unwrap_or(defaults.consumer_enabled),
            consumer_group: std::env::var("TRACKLOG_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            publish_queue_capacity: env_parse("TRACKLOG_PUBLISH_QUEUE")?
                .unwrap_or(defaults.publish_queue_capacity),
            publish_timeout_ms: env_parse("TRACKLOG_PUBLISH_TIMEOUT_MS")?
                .unwrap_or(defaults.publish_timeout_ms),
            persist_workers: env_parse("TRACKLOG_PERSIST_WORKERS")?
                .unwrap_or(defaults.persist_workers),
            store_timeout_ms: env_parse("TRACKLOG_STORE_TIMEOUT_MS")?
                .unwrap_or(defaults.store_timeout_ms),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The topic or consumer group is blank
    /// - The publish queue capacity or worker count is zero
    /// - A timeout is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("topic cannot be blank".to_string()));
        }
        if self.consumer_group.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "consumer group cannot be blank".to_string(),
            ));
        }
        if self.publish_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "publish queue capacity must be greater than zero".to_string(),
            ));
        }
        if self.persist_workers == 0 {
            return Err(ConfigError::Invalid(
                "persist workers must be greater than zero".to_string(),
            ));
        }
        if self.publish_timeout_ms == 0 || self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Publish timeout as a `Duration`.
    #[must_use]
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Store write timeout as a `Duration`.
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Parses an optional environment variable.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if the variable is set but unparseable.
pub fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
