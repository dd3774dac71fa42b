//! Tracked event data model.
//!
//! Defines the `TrackedEvent` emitted once per intercepted call, together with
//! the `Severity` classification and the `Payload` union used for the opaque
//! request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::envelope::ErrorStatus;

/// Severity classification of a tracked call.
///
/// A call is `Error` when its response envelope carries at least one error
/// entry, and `Info` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// The call completed without reported errors.
    #[default]
    Info,
    /// The call reported one or more errors.
    Error,
}

impl Severity {
    /// Derives the severity from a response envelope's error list.
    ///
    /// # Example
    ///
    /// ```
    /// use shared::models::{ErrorStatus, Severity};
    ///
    /// assert_eq!(Severity::from_errors(&[]), Severity::Info);
    ///
    /// let errors = vec![ErrorStatus::new("1005", "Sentence cannot be blank")];
    /// assert_eq!(Severity::from_errors(&errors), Severity::Error);
    /// ```
    #[must_use]
    pub fn from_errors(errors: &[ErrorStatus]) -> Self {
        if errors.is_empty() {
            Self::Info
        } else {
            Self::Error
        }
    }

    /// Returns the canonical upper-case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a severity label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown severity '{0}', expected INFO or ERROR")]
pub struct UnknownSeverity(pub String);

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Self::Info),
            "ERROR" => Ok(Self::Error),
            _ => Err(UnknownSeverity(s.to_string())),
        }
    }
}

/// Opaque request or response body captured from a call.
///
/// Capture is best-effort: a body may be missing, available only as raw
/// bytes, or decoded into a structured JSON value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    /// No body was captured.
    #[default]
    Absent,
    /// Undecoded body bytes, serialized as base64.
    Raw {
        /// The body bytes.
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Body decoded into a JSON value.
    Structured {
        /// The decoded value.
        value: serde_json::Value,
    },
}

impl Payload {
    /// Creates a raw payload from body bytes.
    #[must_use]
    pub fn raw(data: impl Into<Vec<u8>>) -> Self {
        Self::Raw { data: data.into() }
    }

    /// Creates a structured payload from a JSON value.
    #[must_use]
    pub fn structured(value: serde_json::Value) -> Self {
        Self::Structured { value }
    }

    /// Serializes a typed value into a structured payload.
    ///
    /// Values that cannot be represented as JSON degrade to `Absent`.
    #[must_use]
    pub fn from_serializable<T: Serialize>(value: &T) -> Self {
        serde_json::to_value(value).map_or(Self::Absent, Self::structured)
    }

    /// Returns true if no body was captured.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Returns the structured value, if any.
    #[must_use]
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured { value } => Some(value),
            Self::Absent | Self::Raw { .. } => None,
        }
    }

    /// Collects the textual content of the payload.
    ///
    /// Structured payloads contribute every string leaf, raw payloads their
    /// UTF-8 text when valid.
    pub(crate) fn collect_text(&self, out: &mut Vec<String>) {
        match self {
            Self::Absent => {}
            Self::Raw { data } => {
                if let Ok(text) = std::str::from_utf8(data) {
                    out.push(text.to_string());
                }
            }
            Self::Structured { value } => collect_strings(value, out),
        }
    }
}

fn collect_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, out);
            }
        }
        serde_json::Value::Null | serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {}
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// An audit event produced for a single intercepted call.
///
/// Created by capture after the wrapped operation returns and handed over to
/// the event channel; it is not mutated after that hand-off.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use shared::models::{Payload, Severity, TrackedEvent};
///
/// let request_ts = Utc::now();
/// let response_ts = request_ts + Duration::milliseconds(12);
///
/// let event = TrackedEvent::new(
///     "ReverseWordsService",
///     Payload::Absent,
///     Payload::structured(serde_json::json!({"errors": []})),
///     request_ts,
///     response_ts,
///     Severity::Info,
/// );
///
/// assert_eq!(event.execution_time_ms, 12);
/// assert!(!event.unique_id.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEvent {
    /// Correlation identifier, unique per event.
    pub unique_id: String,

    /// Label of the instrumented operation.
    pub service_name: String,

    /// Captured request body.
    #[serde(default)]
    pub request_body: Payload,

    /// Captured response body.
    #[serde(default)]
    pub response_body: Payload,

    /// When the call was received.
    pub request_ts: DateTime<Utc>,

    /// When the call returned. Never earlier than `request_ts`.
    pub response_ts: DateTime<Utc>,

    /// `response_ts - request_ts` in milliseconds.
    pub execution_time_ms: u64,

    /// Derived severity.
    #[serde(default)]
    pub severity: Severity,
}

impl TrackedEvent {
    /// Creates an event with a fresh unique id and derived execution time.
    ///
    /// A `response_ts` earlier than `request_ts` (wall-clock adjustment) is
    /// clamped to `request_ts`.
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        request_body: Payload,
        response_body: Payload,
        request_ts: DateTime<Utc>,
        response_ts: DateTime<Utc>,
        severity: Severity,
    ) -> Self {
        let response_ts = response_ts.max(request_ts);
        let elapsed = response_ts.signed_duration_since(request_ts);

        Self {
            unique_id: Uuid::new_v4().to_string(),
            service_name: service_name.into(),
            request_body,
            response_body,
            request_ts,
            response_ts,
            execution_time_ms: u64::try_from(elapsed.num_milliseconds()).unwrap_or(0),
            severity,
        }
    }
}
