//! Persisted record data model.
//!
//! A `PersistedRecord` is the durable form of a `TrackedEvent`, keyed by its
//! unique id and carrying the text projection used by full-text search.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{Payload, Severity, TrackedEvent};

/// Durable form of a tracked event.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use shared::models::{Payload, PersistedRecord, Severity, TrackedEvent};
///
/// let now = Utc::now();
/// let event = TrackedEvent::new(
///     "ReverseWordsService",
///     Payload::structured(serde_json::json!({"sentence": "Hello World"})),
///     Payload::structured(serde_json::json!({"reversed_sentence": "olleH dlroW", "errors": []})),
///     now,
///     now,
///     Severity::Info,
/// );
///
/// let record = PersistedRecord::from_event(event);
/// assert_eq!(record.search_text, "hello world olleh dlrow");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Primary key.
    pub unique_id: String,

    /// Label of the instrumented operation.
    pub service_name: String,

    /// Captured request body.
    pub request_body: Payload,

    /// Captured response body.
    pub response_body: Payload,

    /// When the call was received.
    pub request_ts: DateTime<Utc>,

    /// When the call returned.
    pub response_ts: DateTime<Utc>,

    /// Call duration in milliseconds.
    pub execution_time_ms: u64,

    /// Derived severity (secondary index).
    pub severity: Severity,

    /// Lower-cased tokens of the request and response text, space separated
    /// (full-text index).
    pub search_text: String,
}

impl PersistedRecord {
    /// Builds the record for an event. The result depends only on the event,
    /// so redelivered events produce identical records.
    #[must_use]
    pub fn from_event(event: TrackedEvent) -> Self {
        let mut text = Vec::new();
        event.request_body.collect_text(&mut text);
        event.response_body.collect_text(&mut text);

        let search_text = text
            .iter()
            .flat_map(|fragment| tokenize(fragment))
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            unique_id: event.unique_id,
            service_name: event.service_name,
            request_body: event.request_body,
            response_body: event.response_body,
            request_ts: event.request_ts,
            response_ts: event.response_ts,
            execution_time_ms: event.execution_time_ms,
            severity: event.severity,
            search_text,
        }
    }

    /// Iterates over the indexed tokens of this record.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.search_text.split(' ').filter(|t| !t.is_empty())
    }
}

impl From<TrackedEvent> for PersistedRecord {
    fn from(event: TrackedEvent) -> Self {
        Self::from_event(event)
    }
}

/// Splits text into lower-cased alphanumeric tokens.
///
/// # Example
///
/// ```
/// use shared::models::tokenize;
///
/// let tokens: Vec<String> = tokenize("Hello, World! it's 2024").collect();
/// assert_eq!(tokens, vec!["hello", "world", "it", "s", "2024"]);
/// ```
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}
