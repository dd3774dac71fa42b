//! Call tracking middleware.
//!
//! Wraps a route so that every call is captured as an audit event. The
//! request body is buffered and handed back to the handler unchanged; the
//! response body is buffered, parsed as a JSON envelope for classification
//! and returned to the client byte for byte.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::LengthLimitError;
use shared::capture::{EventCapture, JsonEnvelope, TrackSpec};
use shared::models::{codes, ErrorStatus};
use std::sync::Arc;

/// Middleware state for one tracked route.
#[derive(Debug, Clone)]
pub struct Tracker {
    capture: EventCapture,
    spec: Arc<TrackSpec>,
    max_body_bytes: usize,
}

impl Tracker {
    /// Creates a tracker for the operation declared by `spec`.
    #[must_use]
    pub fn new(capture: EventCapture, spec: TrackSpec, max_body_bytes: usize) -> Self {
        Self {
            capture,
            spec: Arc::new(spec),
            max_body_bytes,
        }
    }
}

/// Whether a body read failed because the body was over the size cap.
fn exceeds_length_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        if err.is::<LengthLimitError>() {
            return true;
        }
        source = err.source();
    }
    false
}

/// Captures the call, runs the handler and returns its response unchanged.
///
/// Request bodies over the tracker's size cap are answered with 413 and a
/// 1002 envelope; other unreadable bodies get 400. Both are still captured.
pub async fn track(State(tracker): State<Tracker>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();

    let raw_request = match to_bytes(body, tracker.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                service_name = %tracker.spec.service_name,
                error = %e,
                "Request body could not be read"
            );
            let pending = tracker.capture.begin(&tracker.spec, &[]);
            let errors = vec![ErrorStatus::new(
                codes::REQUEST_VALIDATION,
                format!("Request body could not be read: {e}"),
            )];
            let body = serde_json::json!({ "errors": errors });
            pending.complete(&JsonEnvelope::from_bytes(body.to_string().as_bytes()));
            let status = if exceeds_length_limit(&e) {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            return (status, Json(body)).into_response();
        }
    };

    let pending = tracker.capture.begin(&tracker.spec, &raw_request);
    let response = next
        .run(Request::from_parts(parts, Body::from(raw_request)))
        .await;

    let (parts, body) = response.into_parts();
    match to_bytes(body, usize::MAX).await {
        Ok(raw_response) => {
            pending.complete(&JsonEnvelope::from_bytes(&raw_response));
            Response::from_parts(parts, Body::from(raw_response))
        }
        Err(e) => {
            tracing::error!(
                service_name = %tracker.spec.service_name,
                error = %e,
                "Response body could not be read"
            );
            pending.fail();
            Response::from_parts(parts, Body::empty())
        }
    }
}
