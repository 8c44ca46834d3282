use thiserror::Error;

/// Failure classification for the voice transcription client.
///
/// Capture and connection faults are terminal for the session; a
/// `RecognitionError` is reported but leaves the transport open; a
/// `DecodeError` never reaches the caller's listener.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VoiceError {
    /// The user (or the host) declined access to the audio input
    #[error("audio input access denied: {0}")]
    PermissionDenied(String),

    /// The audio input (microphone or file) does not exist
    #[error("audio input not found: {0}")]
    DeviceNotFound(String),

    /// Capture cannot run in this environment (insecure context, unsupported format, ...)
    #[error("audio capture unsupported: {0}")]
    UnsupportedEnvironment(String),

    /// Application id, API key or API secret is not configured
    #[error("missing speech credentials: {0}. Set XF_APPID, XF_APIKEY and XF_APISECRET")]
    MissingCredentials(String),

    /// Transport-level fault while opening or during the stream
    #[error("failed to connect to speech service: {0}")]
    ConnectionFailed(String),

    /// The remote service rejected the audio (bad audio, quota, ...)
    #[error("speech recognition error: {0}")]
    RecognitionError(String),

    /// An inbound message could not be decoded
    #[error("failed to decode speech service message: {0}")]
    DecodeError(String),

    /// `start()` was called while a session is still active
    #[error("a voice session is already active; stop it first")]
    SessionActive,
}

impl VoiceError {
    /// Whether this fault ends the session it occurred in.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::RecognitionError(_) | Self::DecodeError(_))
    }
}

impl From<std::io::Error> for VoiceError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(e.to_string()),
            std::io::ErrorKind::NotFound => Self::DeviceNotFound(e.to_string()),
            _ => Self::UnsupportedEnvironment(e.to_string()),
        }
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;
