pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod transcription;

pub use audio::{
    AudioBackend, AudioFile, CaptureConstraints, FileBackend, LevelMeter, MicBackend, PushBackend,
    PushHandle, SampleBlock,
};
pub use config::Config;
pub use error::{VoiceError, VoiceResult};
pub use http::{create_router, AppState};
pub use session::{
    ChannelListener, MicTestReport, SessionConfig, SessionState, SessionStats, TranscriptSegment,
    VoiceEvent, VoiceListener, VoiceSession,
};
pub use transcription::{
    AuthorizationContext, Credentials, FrameEncoder, SpeechConnector, SpeechTransport,
    TranscriptionEvent, WsConnector,
};
