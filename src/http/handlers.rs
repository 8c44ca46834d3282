use super::state::AppState;
use crate::audio::{AudioBackend, CaptureConstraints, FileBackend, LevelMeter, MicBackend};
use crate::error::VoiceError;
use crate::session::{
    run_mic_test, SessionStats, TracingListener, TranscriptSegment, VoiceSession,
    DEFAULT_MIC_TEST_WINDOW,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,

    /// WAV file to stream instead of the microphone
    pub file: Option<String>,

    /// Pace file blocks at capture speed (default: true)
    pub realtime: Option<bool>,

    /// Input device name (default: the system default input)
    pub device: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Deserialize)]
pub struct MicTestRequest {
    /// WAV file to measure instead of the microphone
    pub file: Option<String>,

    /// Test window in seconds (default: 5)
    pub window_secs: Option<u64>,

    /// Input device name (default: the system default input)
    pub device: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RemoveSessionResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// HTTP status for a classified failure
pub fn status_for(err: &VoiceError) -> StatusCode {
    match err {
        VoiceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        VoiceError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        VoiceError::UnsupportedEnvironment(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VoiceError::MissingCredentials(_) => StatusCode::SERVICE_UNAVAILABLE,
        VoiceError::ConnectionFailed(_) => StatusCode::BAD_GATEWAY,
        VoiceError::SessionActive => StatusCode::CONFLICT,
        VoiceError::RecognitionError(_) | VoiceError::DecodeError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// The microphone unless a WAV file is given
fn capture_backend(
    constraints: &CaptureConstraints,
    file: Option<&str>,
    realtime: bool,
    device: Option<&str>,
) -> Box<dyn AudioBackend> {
    match (file, device) {
        (Some(file), _) => Box::new(FileBackend::new(file, constraints.clone()).realtime(realtime)),
        (None, Some(device)) => Box::new(MicBackend::new(constraints.clone()).with_device(device)),
        (None, None) => Box::new(MicBackend::new(constraints.clone())),
    }
}

fn not_found(session_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Session {} not found", session_id),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /voice/sessions
/// Start a new voice session
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    // Generate or use provided session ID
    let session_id = req
        .session_id
        .unwrap_or_else(|| format!("voice-{}", uuid::Uuid::new_v4()));

    info!("Starting voice session: {}", session_id);

    let session = Arc::new(VoiceSession::new(
        state.config.session_config(session_id.clone()),
        Arc::clone(&state.connector),
        Arc::new(TracingListener::new(session_id.clone())),
    ));

    // Claimed before starting so a concurrent request for the same ID is
    // refused; a finished session under the same ID is replaced
    if !state.reserve(&session).await {
        return error_response(
            StatusCode::CONFLICT,
            format!("Session {} is already active", session_id),
        );
    }

    let backend = capture_backend(
        &state.config.audio,
        req.file.as_deref(),
        req.realtime.unwrap_or(true),
        req.device.as_deref(),
    );

    if let Err(e) = session.start(backend).await {
        error!("Failed to start voice session {}: {}", session_id, e);
        state.unreserve(&session).await;
        return error_response(status_for(&e), e.to_string());
    }

    info!("Voice session started: {}", session_id);

    (
        StatusCode::OK,
        Json(StartSessionResponse {
            session_id: session_id.clone(),
            status: "streaming".to_string(),
            message: format!("Voice session {} started", session_id),
        }),
    )
        .into_response()
}

/// POST /voice/sessions/:session_id/stop
/// Stop a voice session; its transcript stays available
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("Stopping voice session: {}", session_id);

    let session = {
        let sessions = state.sessions.read().await;
        sessions.get(&session_id).cloned()
    };

    match session {
        Some(session) => {
            let stats = session.stop().await;
            (
                StatusCode::OK,
                Json(StopSessionResponse {
                    session_id: session_id.clone(),
                    status: stats.state.to_string(),
                    message: "Voice session stopped".to_string(),
                    stats,
                }),
            )
                .into_response()
        }
        None => not_found(&session_id),
    }
}

/// DELETE /voice/sessions/:session_id
/// Forget a finished session and its transcript
pub async fn remove_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let mut sessions = state.sessions.write().await;

    match sessions.get(&session_id) {
        Some(session) if session.is_active() => error_response(
            StatusCode::CONFLICT,
            format!("Session {} is still active; stop it first", session_id),
        ),
        Some(_) => {
            sessions.remove(&session_id);
            info!("Removed voice session: {}", session_id);
            (
                StatusCode::OK,
                Json(RemoveSessionResponse {
                    session_id: session_id.clone(),
                    message: "Voice session removed".to_string(),
                }),
            )
                .into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /voice/sessions/:session_id/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => (StatusCode::OK, Json(session.stats())).into_response(),
        None => not_found(&session_id),
    }
}

/// GET /voice/sessions/:session_id/transcript
/// Get transcript for a session (accumulated so far)
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => {
            let transcript: Vec<TranscriptSegment> = session.transcript();
            (StatusCode::OK, Json(transcript)).into_response()
        }
        None => not_found(&session_id),
    }
}

/// POST /voice/mic-test
/// Capture-only level check; no connection is opened
pub async fn mic_test(
    State(state): State<AppState>,
    Json(req): Json<MicTestRequest>,
) -> impl IntoResponse {
    let window = req
        .window_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_MIC_TEST_WINDOW);

    let mut backend = capture_backend(
        &state.config.audio,
        req.file.as_deref(),
        true,
        req.device.as_deref(),
    );

    match run_mic_test(backend.as_mut(), window, &LevelMeter::new()).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!("Microphone test failed: {}", e);
            error_response(status_for(&e), e.to_string())
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
