//! Integration tests for the Tracklog API.
//!
//! These tests drive the full flow: a tracked call is captured, published on
//! the in-memory channel, persisted by the consumer and found again through
//! the search endpoint.

use api::routes::{REVERSE_WORDS_SERVICE, WORDS_LOOKUP_SERVICE};
use api::{create_router, AppState, Pipeline};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use shared::config::PipelineConfig;
use shared::models::Severity;
use shared::storage::RecordQuery;
use std::time::Duration;

/// Starts an in-memory pipeline and a router bound to it.
async fn test_app() -> (Router, AppState, Pipeline) {
    let pipeline = Pipeline::in_memory(&PipelineConfig::default(), 1024 * 1024)
        .await
        .unwrap();
    let state = pipeline.state();
    let router = create_router(state.clone());
    (router, state, pipeline)
}

/// Helper to make a POST request with JSON body.
async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
    )
    .await
    .unwrap();

    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    (status, json)
}

/// Helper to make a GET request.
async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    (status, json)
}

/// Waits until the store holds at least `expected` records.
async fn wait_for_records(state: &AppState, expected: usize) {
    let store = state.store().unwrap();
    for _ in 0..300 {
        if store.count().unwrap() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} records, found {}",
        store.count().unwrap()
    );
}

// ============================================================================
// HEALTH TESTS
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_health_reports_persistence() {
    let (app, state, _pipeline) = test_app().await;

    let (status, health) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["persistence"], "enabled");

    // Health checks are not tracked.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.store().unwrap().count().unwrap(), 0);
}

// ============================================================================
// REVERSE TESTS
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_reverse_is_persisted_as_info() {
    let (app, state, _pipeline) = test_app().await;

    let (status, body) = post_json(
        app,
        "/words/reverse",
        json!({"sentence": "Hello World"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reversed_sentence"], "olleH dlroW");
    assert_eq!(body["errors"], json!([]));

    wait_for_records(&state, 1).await;
    let records = state
        .store()
        .unwrap()
        .query(&RecordQuery::new())
        .unwrap()
        .records;

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.service_name, REVERSE_WORDS_SERVICE);
    assert_eq!(record.severity, Severity::Info);
    assert!(record.response_ts >= record.request_ts);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blank_sentence_is_persisted_as_error() {
    let (app, state, _pipeline) = test_app().await;

    let (status, body) = post_json(app, "/words/reverse", json!({"sentence": "   "})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["code"], "1005");

    wait_for_records(&state, 1).await;
    let records = state
        .store()
        .unwrap()
        .query(&RecordQuery::new())
        .unwrap()
        .records;
    assert_eq!(records[0].severity, Severity::Error);
}

// ============================================================================
// SEARCH TESTS
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_reverse_then_search_finds_record() {
    let (app, state, _pipeline) = test_app().await;

    let (status, _) = post_json(
        app.clone(),
        "/words/reverse",
        json!({"sentence": "quick brown fox"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    wait_for_records(&state, 1).await;

    let (status, body) = post_json(app, "/words/search", json!({"word": "brown"})).await;

    assert_eq!(status, StatusCode::OK);
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["word"], "brown");
    assert_eq!(records[0]["service_name"], REVERSE_WORDS_SERVICE);
    assert_eq!(records[0]["request"]["sentence"], "quick brown fox");
    assert_eq!(
        records[0]["response"]["reversed_sentence"],
        "kciuq nworb xof"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_matches_reversed_word() {
    let (app, state, _pipeline) = test_app().await;

    post_json(app.clone(), "/words/reverse", json!({"sentence": "abc"})).await;
    wait_for_records(&state, 1).await;

    let (status, body) = post_json(app, "/words/search", json!({"word": "CBA"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"][0]["request"]["sentence"], "abc");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_is_itself_tracked() {
    let (app, state, _pipeline) = test_app().await;

    let (status, body) =
        post_json(app.clone(), "/words/search", json!({"word": "nothing"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "1007");

    wait_for_records(&state, 1).await;

    let (status, body) = post_json(app, "/words/search", json!({"all_records": true})).await;
    assert_eq!(status, StatusCode::OK);
    let records = body["records"].as_array().unwrap();
    assert_eq!(records[0]["service_name"], WORDS_LOOKUP_SERVICE);
    assert_eq!(records[0]["severity"], "ERROR");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_severity_filter() {
    let (app, state, _pipeline) = test_app().await;

    post_json(app.clone(), "/words/reverse", json!({"sentence": "ok words"})).await;
    post_json(app.clone(), "/words/reverse", json!({"sentence": ""})).await;
    wait_for_records(&state, 2).await;

    let (status, body) = post_json(
        app.clone(),
        "/words/search",
        json!({"all_records": true, "severity": "ERROR"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["severity"], "ERROR");

    let (status, body) = post_json(
        app,
        "/words/search",
        json!({"all_records": true, "severity": "loud"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["code"], "1006");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_without_criteria_is_rejected() {
    let (app, _state, _pipeline) = test_app().await;

    let (status, body) = post_json(app, "/words/search", json!({})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["records"], json!([]));
    assert_eq!(body["errors"][0]["code"], "1006");
}

// ============================================================================
// SHUTDOWN TESTS
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_after_tracked_call() {
    let (app, state, pipeline) = test_app().await;

    let (status, _) = post_json(app, "/words/reverse", json!({"sentence": "drain me"})).await;
    assert_eq!(status, StatusCode::OK);
    wait_for_records(&state, 1).await;

    drop(state);
    tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown(Duration::from_secs(2)))
        .await
        .expect("pipeline shut down in time");
}
