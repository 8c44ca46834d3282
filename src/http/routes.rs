use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session control
        .route("/voice/sessions", post(handlers::start_session))
        .route(
            "/voice/sessions/:session_id",
            delete(handlers::remove_session),
        )
        .route(
            "/voice/sessions/:session_id/stop",
            post(handlers::stop_session),
        )
        // Session queries
        .route(
            "/voice/sessions/:session_id/status",
            get(handlers::get_session_status),
        )
        .route(
            "/voice/sessions/:session_id/transcript",
            get(handlers::get_session_transcript),
        )
        // Capture-only check
        .route("/voice/mic-test", post(handlers::mic_test))
        // The planner UI calls from its own origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
