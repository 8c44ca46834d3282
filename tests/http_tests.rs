// Integration tests for the HTTP control API
//
// Requests go straight into the router; sessions are fed from WAV files and
// talk to the in-memory dictation service.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use travel_voice::{create_router, AppState, Config, Credentials};

fn app(connector: &Arc<FakeConnector>, credentials: Credentials) -> Router {
    let mut config = Config::default();
    config.credentials = credentials;
    config.recognition.closing_grace_ms = 100;

    create_router(AppState::with_connector(config, connector.clone()))
}

fn valid_credentials() -> Credentials {
    Credentials::new("test-app", "test-key", "test-secret")
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, value)
}

async fn wait_for_state(app: &Router, session_id: &str, state: &str) -> Value {
    let uri = format!("/voice/sessions/{}/status", session_id);
    for _ in 0..300 {
        let (status, stats) = call(app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        if stats["state"] == state {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never reached {}", session_id, state);
}

fn wav(dir: &Path, seconds: usize) -> String {
    write_wav(dir, "trip.wav", 16000, 1, 16000 * seconds, 0.3)
        .display()
        .to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = app(&FakeConnector::new(), valid_credentials());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn test_session_from_file_produces_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.finish_on_last(result_message(&["去", "成都"], 2));
    let app = app(&connector, valid_credentials());

    let (status, body) = call(
        &app,
        "POST",
        "/voice/sessions",
        Some(json!({ "session_id": "trip", "file": wav(dir.path(), 1), "realtime": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "trip");

    let stats = wait_for_state(&app, "trip", "closed").await;
    assert_eq!(stats["blocks_captured"], 4);
    assert_eq!(stats["transcript_segments_count"], 1);
    assert!(stats["last_error"].is_null());

    let (status, transcript) = call(&app, "GET", "/voice/sessions/trip/transcript", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(transcript[0]["text"], "去成都");
    assert_eq!(transcript[0]["is_final"], true);
}

#[tokio::test]
async fn test_stop_session() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let app = app(&connector, valid_credentials());

    let (status, _) = call(
        &app,
        "POST",
        "/voice/sessions",
        Some(json!({ "session_id": "long", "file": wav(dir.path(), 10) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "POST", "/voice/sessions/long/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");
    assert_eq!(body["stats"]["is_recording"], false);

    let statuses = connector.remote(0).statuses();
    assert_eq!(statuses.first(), Some(&0));
    assert_eq!(statuses.last(), Some(&2));

    // Stopping again is harmless
    let (status, _) = call(&app, "POST", "/voice/sessions/long/stop", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_duplicate_active_session_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&FakeConnector::new(), valid_credentials());
    let request = json!({ "session_id": "dup", "file": wav(dir.path(), 10) });

    let (status, _) = call(&app, "POST", "/voice/sessions", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "POST", "/voice/sessions", Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("dup"));

    call(&app, "POST", "/voice/sessions/dup/stop", None).await;
}

#[tokio::test]
async fn test_concurrent_starts_with_same_id_yield_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let app = app(&connector, valid_credentials());
    let request = json!({ "session_id": "race", "file": wav(dir.path(), 10) });

    let (first, second) = tokio::join!(
        call(&app, "POST", "/voice/sessions", Some(request.clone())),
        call(&app, "POST", "/voice/sessions", Some(request)),
    );

    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);
    assert_eq!(connector.connections(), 1);

    let (status, body) = call(&app, "POST", "/voice/sessions/race/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");
    assert!(connector.remote(0).is_closed());
}

#[tokio::test]
async fn test_failed_start_frees_the_id() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let app = app(&connector, valid_credentials());

    let (status, _) = call(
        &app,
        "POST",
        "/voice/sessions",
        Some(json!({ "session_id": "retry", "file": "/nonexistent/trip.wav" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "GET", "/voice/sessions/retry/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &app,
        "POST",
        "/voice/sessions",
        Some(json!({ "session_id": "retry", "file": wav(dir.path(), 10) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    call(&app, "POST", "/voice/sessions/retry/stop", None).await;
}

#[tokio::test]
async fn test_remove_session() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&FakeConnector::new(), valid_credentials());

    let (status, _) = call(
        &app,
        "POST",
        "/voice/sessions",
        Some(json!({ "session_id": "old", "file": wav(dir.path(), 10) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, "DELETE", "/voice/sessions/old", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    call(&app, "POST", "/voice/sessions/old/stop", None).await;
    let (status, body) = call(&app, "DELETE", "/voice/sessions/old", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "old");

    let (status, _) = call(&app, "GET", "/voice/sessions/old/transcript", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "DELETE", "/voice/sessions/old", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_errors_map_to_status_codes() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();

    let no_credentials = app(&connector, Credentials::default());
    let (status, body) = call(
        &no_credentials,
        "POST",
        "/voice/sessions",
        Some(json!({ "file": wav(dir.path(), 1) })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("XF_APPID"));

    let app = app(&connector, valid_credentials());
    let (status, _) = call(
        &app,
        "POST",
        "/voice/sessions",
        Some(json!({ "file": "/nonexistent/trip.wav" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(connector.connections(), 0);
}

#[tokio::test]
async fn test_unknown_session() {
    let app = app(&FakeConnector::new(), valid_credentials());

    let (status, body) = call(&app, "GET", "/voice/sessions/nope/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Session nope not found");

    let (status, _) = call(&app, "POST", "/voice/sessions/nope/stop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mic_test_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let app = app(&connector, valid_credentials());

    let (status, report) = call(
        &app,
        "POST",
        "/voice/mic-test",
        Some(json!({ "file": wav(dir.path(), 1), "window_secs": 3 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["blocks"], 4);
    assert_eq!(report["voiced_blocks"], 4);
    assert_eq!(report["window_ms"], 3000);
    assert_eq!(connector.connections(), 0);
}
