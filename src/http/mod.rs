//! HTTP API server for the travel planner front end
//!
//! This module provides a REST API for controlling voice sessions:
//! - POST /voice/sessions - Start a session from the microphone or a WAV file
//! - POST /voice/sessions/:id/stop - Stop a session
//! - DELETE /voice/sessions/:id - Forget a finished session
//! - GET /voice/sessions/:id/status - Query session status
//! - GET /voice/sessions/:id/transcript - Get accumulated transcript
//! - POST /voice/mic-test - Capture-only level check
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::status_for;
pub use routes::create_router;
pub use state::{AppState, MAX_FINISHED_SESSIONS};
