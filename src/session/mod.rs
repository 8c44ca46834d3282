//! Voice session management
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - The session state machine (idle, authorizing, streaming, closing, closed)
//! - Moving captured blocks to the dictation connection in capture order
//! - Decoding inbound events and reporting them to a `VoiceListener`
//! - Teardown on stop, end of input, remote completion and faults
//! - The capture-only microphone test

mod config;
mod listener;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use listener::{ChannelListener, TracingListener, VoiceEvent, VoiceListener};
pub use session::{run_mic_test, VoiceSession, DEFAULT_MIC_TEST_WINDOW};
pub use state::SessionState;
pub use stats::{MicTestReport, SessionStats, TranscriptSegment};
