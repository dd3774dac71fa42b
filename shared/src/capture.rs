//! Event capture for instrumented operations.
//!
//! An [`EventCapture`] wraps exactly one invocation of an inbound operation:
//! it timestamps the call, best-effort decodes the request body, runs the
//! operation, classifies the result and hands a [`TrackedEvent`] to the
//! [`EventPublisher`]. Capture is purely observational. The operation's
//! result is always returned unchanged and capture failures are only logged.
//!
//! # Example
//!
//! ```
//! use shared::capture::{EventCapture, RequestShape, TrackSpec};
//! use shared::channel::EventPublisher;
//! use shared::models::{ReverseSentenceRequest, ReverseSentenceResponse};
//!
//! # async fn example() {
//! let (publisher, mut events) = EventPublisher::bounded(16);
//! let capture = EventCapture::new(publisher);
//! let spec = TrackSpec::new("ReverseWordsService")
//!     .with_request_shape(RequestShape::of::<ReverseSentenceRequest>());
//!
//! let result: Result<_, std::convert::Infallible> = capture
//!     .track(&spec, br#"{"sentence":"abc"}"#, || async {
//!         Ok(ReverseSentenceResponse {
//!             reversed_sentence: Some("cba".to_string()),
//!             errors: vec![],
//!         })
//!     })
//!     .await;
//!
//! assert!(result.is_ok());
//! assert_eq!(events.recv().await.unwrap().service_name, "ReverseWordsService");
//! # }
//! ```

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::channel::EventPublisher;
use crate::models::{ErrorStatus, Payload, ResponseEnvelope, Severity, TrackedEvent};

/// Tracing target of the per-event capture log line.
pub const CAPTURE_TARGET: &str = "tracklog::capture";

type DecodeFn = fn(&[u8]) -> Result<serde_json::Value, serde_json::Error>;

/// Expected shape of a request body, used to decode it into a structured
/// payload.
#[derive(Clone, Copy)]
pub struct RequestShape {
    name: &'static str,
    decode: DecodeFn,
}

impl RequestShape {
    /// Shape of the type `T`. Unknown fields in the body are ignored.
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: DeserializeOwned + Serialize,
    {
        Self {
            name: std::any::type_name::<T>(),
            decode: decode_as::<T>,
        }
    }

    /// Type name of the shape.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decodes a raw body into the normalized JSON form of the shape.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if the body does not fit the shape.
    pub fn decode(&self, raw: &[u8]) -> Result<serde_json::Value, serde_json::Error> {
        (self.decode)(raw)
    }
}

impl std::fmt::Debug for RequestShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RequestShape").field(&self.name).finish()
    }
}

fn decode_as<T>(raw: &[u8]) -> Result<serde_json::Value, serde_json::Error>
where
    T: DeserializeOwned + Serialize,
{
    let typed: T = serde_json::from_slice(raw)?;
    serde_json::to_value(typed)
}

/// Declaration of an instrumented operation.
#[derive(Debug, Clone)]
pub struct TrackSpec {
    /// Label recorded as the event's service name.
    pub service_name: String,
    /// Expected request shape, if any.
    pub request_shape: Option<RequestShape>,
}

impl TrackSpec {
    /// Declares an operation without a request shape. Non-blank request
    /// bodies are captured raw.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            request_shape: None,
        }
    }

    /// Sets the expected request shape.
    #[must_use]
    pub fn with_request_shape(mut self, shape: RequestShape) -> Self {
        self.request_shape = Some(shape);
        self
    }
}

/// Builds and emits tracked events.
#[derive(Debug, Clone)]
pub struct EventCapture {
    publisher: EventPublisher,
}

impl EventCapture {
    /// Creates a capture emitting through `publisher`.
    #[must_use]
    pub fn new(publisher: EventPublisher) -> Self {
        Self { publisher }
    }

    /// Starts capturing a call: records the request timestamp and decodes the
    /// raw request body.
    #[must_use]
    pub fn begin(&self, spec: &TrackSpec, raw_request: &[u8]) -> PendingCapture {
        let request_ts = Utc::now();
        let request_body = capture_request(spec, raw_request);

        PendingCapture {
            publisher: self.publisher.clone(),
            service_name: spec.service_name.clone(),
            request_body,
            request_ts,
        }
    }

    /// Runs `operation` once under capture and returns its result unchanged.
    ///
    /// An `Ok` envelope is classified by its error list; an `Err` is recorded
    /// with an absent response body and ERROR severity.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, never a capture error.
    pub async fn track<T, E, F, Fut>(
        &self,
        spec: &TrackSpec,
        raw_request: &[u8],
        operation: F,
    ) -> Result<T, E>
    where
        T: ResponseEnvelope,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let pending = self.begin(spec, raw_request);
        let result = operation().await;

        match &result {
            Ok(envelope) => {
                pending.complete(envelope);
            }
            Err(_) => {
                pending.fail();
            }
        }

        result
    }
}

fn capture_request(spec: &TrackSpec, raw: &[u8]) -> Payload {
    if raw.trim_ascii().is_empty() {
        return Payload::Absent;
    }

    let Some(shape) = &spec.request_shape else {
        return Payload::raw(raw);
    };

    match shape.decode(raw) {
        Ok(value) => Payload::structured(value),
        Err(e) => {
            tracing::warn!(
                target: CAPTURE_TARGET,
                service_name = %spec.service_name,
                shape = shape.name(),
                error = %e,
                "Request body does not match expected shape, not captured"
            );
            Payload::Absent
        }
    }
}

/// A call whose request side has been captured.
#[derive(Debug)]
pub struct PendingCapture {
    publisher: EventPublisher,
    service_name: String,
    request_body: Payload,
    request_ts: DateTime<Utc>,
}

impl PendingCapture {
    /// Completes the capture with the operation's response envelope and
    /// emits the event. Returns the event's unique id.
    pub fn complete(self, envelope: &impl ResponseEnvelope) -> String {
        let severity = Severity::from_errors(envelope.errors());
        let response_body = envelope.body();
        self.finish(response_body, severity)
    }

    /// Completes the capture of an operation that failed without producing
    /// a response. Returns the event's unique id.
    pub fn fail(self) -> String {
        self.finish(Payload::Absent, Severity::Error)
    }

    fn finish(self, response_body: Payload, severity: Severity) -> String {
        let event = TrackedEvent::new(
            self.service_name,
            self.request_body,
            response_body,
            self.request_ts,
            Utc::now(),
            severity,
        );

        tracing::info!(
            target: CAPTURE_TARGET,
            unique_id = %event.unique_id,
            service_name = %event.service_name,
            severity = %event.severity,
            execution_time_ms = event.execution_time_ms,
            request_ts = %event.request_ts.to_rfc3339(),
            "Tracked call"
        );

        let unique_id = event.unique_id.clone();
        if let Err(e) = self.publisher.emit(event) {
            tracing::error!(
                target: CAPTURE_TARGET,
                unique_id = %unique_id,
                error = %e,
                "Tracked event not published"
            );
        }
        unique_id
    }
}

/// Response envelope parsed from a serialized JSON body.
///
/// Used where only the encoded response is available, such as HTTP
/// middleware. A body that is not a JSON object with an `errors` array has no
/// errors.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonEnvelope {
    errors: Vec<ErrorStatus>,
    body: Payload,
}

impl JsonEnvelope {
    /// Parses a response body.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Self {
        if raw.trim_ascii().is_empty() {
            return Self {
                errors: Vec::new(),
                body: Payload::Absent,
            };
        }

        match serde_json::from_slice::<serde_json::Value>(raw) {
            Ok(value) => {
                let errors = value
                    .get("errors")
                    .and_then(serde_json::Value::as_array)
                    .map(|entries| entries.iter().map(error_status_lenient).collect())
                    .unwrap_or_default();
                Self {
                    errors,
                    body: Payload::structured(value),
                }
            }
            Err(_) => Self {
                errors: Vec::new(),
                body: Payload::raw(raw),
            },
        }
    }
}

/// Reads one `errors` entry, whatever its shape. Non-string codes and
/// messages keep their JSON text.
fn error_status_lenient(entry: &serde_json::Value) -> ErrorStatus {
    let text = |value: Option<&serde_json::Value>| match value {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    match entry {
        serde_json::Value::Object(fields) => {
            ErrorStatus::new(text(fields.get("code")), text(fields.get("message")))
        }
        other => ErrorStatus::new(text(Some(other)), String::new()),
    }
}

impl ResponseEnvelope for JsonEnvelope {
    fn errors(&self) -> &[ErrorStatus] {
        &self.errors
    }

    fn body(&self) -> Payload {
        self.body.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{codes, ReverseSentenceRequest, ReverseSentenceResponse};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn capture() -> (EventCapture, mpsc::Receiver<TrackedEvent>) {
        let (publisher, receiver) = EventPublisher::bounded(16);
        (EventCapture::new(publisher), receiver)
    }

    fn reverse_spec() -> TrackSpec {
        TrackSpec::new("ReverseWordsService")
            .with_request_shape(RequestShape::of::<ReverseSentenceRequest>())
    }

    fn ok_response() -> ReverseSentenceResponse {
        ReverseSentenceResponse {
            reversed_sentence: Some("olleH".to_string()),
            errors: vec![],
        }
    }

    #[tokio::test]
    async fn test_track_emits_info_event() {
        let (capture, mut events) = capture();

        let result: Result<_, ()> = capture
            .track(&reverse_spec(), br#"{"sentence":"Hello"}"#, || async {
                Ok(ok_response())
            })
            .await;

        assert_eq!(result.unwrap(), ok_response());

        let event = events.recv().await.unwrap();
        assert_eq!(event.service_name, "ReverseWordsService");
        assert_eq!(event.severity, Severity::Info);
        assert_eq!(event.request_body, Payload::structured(json!({"sentence": "Hello"})));
        assert_eq!(
            event.response_body.as_value().unwrap()["reversed_sentence"],
            "olleH"
        );
        assert!(event.response_ts >= event.request_ts);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_track_errors_yield_error_severity() {
        let (capture, mut events) = capture();

        let _: Result<_, ()> = capture
            .track(&reverse_spec(), br#"{"sentence":" "}"#, || async {
                Ok(ReverseSentenceResponse {
                    reversed_sentence: None,
                    errors: vec![ErrorStatus::new(codes::BLANK_SENTENCE, "blank")],
                })
            })
            .await;

        assert_eq!(events.recv().await.unwrap().severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_track_failed_operation_still_emits() {
        let (capture, mut events) = capture();

        let result: Result<ReverseSentenceResponse, &str> = capture
            .track(&reverse_spec(), b"", || async { Err("boom") })
            .await;

        assert_eq!(result.unwrap_err(), "boom");

        let event = events.recv().await.unwrap();
        assert_eq!(event.severity, Severity::Error);
        assert!(event.request_body.is_absent());
        assert!(event.response_body.is_absent());
    }

    #[tokio::test]
    async fn test_malformed_request_is_absent() {
        let (capture, mut events) = capture();

        let _: Result<_, ()> = capture
            .track(&reverse_spec(), b"{not json", || async { Ok(ok_response()) })
            .await;

        let event = events.recv().await.unwrap();
        assert!(event.request_body.is_absent());
        assert_eq!(event.severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_shape_ignores_unknown_fields() {
        let (capture, mut events) = capture();

        let _: Result<_, ()> = capture
            .track(
                &reverse_spec(),
                br#"{"sentence":"abc","extra":1}"#,
                || async { Ok(ok_response()) },
            )
            .await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.request_body, Payload::structured(json!({"sentence": "abc"})));
    }

    #[tokio::test]
    async fn test_no_shape_captures_raw() {
        let (capture, mut events) = capture();

        let _: Result<_, ()> = capture
            .track(&TrackSpec::new("Raw"), b"plain text", || async {
                Ok(ok_response())
            })
            .await;

        assert_eq!(events.recv().await.unwrap().request_body, Payload::raw("plain text"));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_alter_result() {
        let (publisher, receiver) = EventPublisher::bounded(1);
        drop(receiver);
        let capture = EventCapture::new(publisher);

        let result: Result<_, ()> = capture
            .track(&reverse_spec(), b"{}", || async { Ok(ok_response()) })
            .await;

        assert_eq!(result.unwrap(), ok_response());
    }

    #[test]
    fn test_begin_complete_returns_unique_id() {
        let (capture, mut events) = capture();

        let id = capture.begin(&reverse_spec(), b"").complete(&ok_response());

        assert_eq!(events.try_recv().unwrap().unique_id, id);
    }

    #[test]
    fn test_json_envelope_reads_errors() {
        let envelope = JsonEnvelope::from_bytes(
            br#"{"records":[],"errors":[{"code":"1006","message":"bad"}]}"#,
        );

        assert_eq!(envelope.errors(), &[ErrorStatus::new("1006", "bad")]);
        assert!(envelope.body().as_value().is_some());
    }

    #[test]
    fn test_json_envelope_numeric_code_is_still_an_error() {
        let envelope =
            JsonEnvelope::from_bytes(br#"{"errors":[{"code":1001,"message":"bad cert"}]}"#);

        assert_eq!(
            envelope.errors(),
            &[ErrorStatus::new("1001", "bad cert")]
        );
        assert_eq!(Severity::from_errors(envelope.errors()), Severity::Error);
    }

    #[test]
    fn test_json_envelope_odd_entries_count_as_errors() {
        let envelope = JsonEnvelope::from_bytes(br#"{"errors":["boom", {"message":null}]}"#);

        assert_eq!(
            envelope.errors(),
            &[ErrorStatus::new("boom", ""), ErrorStatus::new("", "")]
        );

        let empty = JsonEnvelope::from_bytes(br#"{"errors":[]}"#);
        assert_eq!(Severity::from_errors(empty.errors()), Severity::Info);
    }

    #[test]
    fn test_json_envelope_without_errors() {
        let envelope = JsonEnvelope::from_bytes(br#"{"status":"healthy"}"#);
        assert!(envelope.errors().is_empty());

        let envelope = JsonEnvelope::from_bytes(b"not json");
        assert!(envelope.errors().is_empty());
        assert_eq!(envelope.body(), Payload::raw("not json"));

        assert!(JsonEnvelope::from_bytes(b"").body().is_absent());
    }

    #[test]
    fn test_request_shape_name() {
        let shape = RequestShape::of::<ReverseSentenceRequest>();
        assert!(shape.name().ends_with("ReverseSentenceRequest"));
    }
}
