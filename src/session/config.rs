use std::time::Duration;

use crate::audio::CaptureConstraints;
use crate::transcription::auth::{Credentials, DEFAULT_HOST, DEFAULT_PATH};
use crate::transcription::frame::RecognitionParams;

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session identifier used in logs and the HTTP API
    pub session_id: String,

    /// Speech service credentials
    pub credentials: Credentials,

    /// Dictation host
    pub host: String,

    /// Dictation path
    pub path: String,

    /// Parameters declared in the first frame
    pub params: RecognitionParams,

    /// Capture format and block size
    pub constraints: CaptureConstraints,

    /// Maximum silence from the service while streaming (None = unbounded)
    pub response_timeout: Option<Duration>,

    /// How long to wait for the final result after the last frame
    pub closing_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("voice-{}", uuid::Uuid::new_v4()),
            credentials: Credentials::default(),
            host: DEFAULT_HOST.to_string(),
            path: DEFAULT_PATH.to_string(),
            params: RecognitionParams::default(),
            constraints: CaptureConstraints::default(),
            response_timeout: None,
            closing_grace: Duration::from_secs(3),
        }
    }
}

impl SessionConfig {
    /// Same configuration under a different session id
    pub fn with_session_id(&self, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..self.clone()
        }
    }
}
