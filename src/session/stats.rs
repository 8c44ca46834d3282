use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier
    pub session_id: String,

    /// Current lifecycle state
    pub state: SessionState,

    /// Whether capture or connection resources are held
    pub is_recording: bool,

    /// When the current (or last) session started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since start
    pub duration_secs: f64,

    /// Frames sent over the connection (first and last included)
    pub frames_sent: u64,

    /// Audio blocks captured
    pub blocks_captured: u64,

    /// Recognized fragments received
    pub transcript_segments_count: usize,

    /// Peak level of the most recent block (0.0 to 1.0+)
    pub audio_level: f32,

    /// Last classified failure, if any
    pub last_error: Option<String>,
}

/// A single recognized fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Recognized text
    pub text: String,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,

    /// Whether the service marked it final (always true today)
    pub is_final: bool,
}

/// Outcome of a capture-only microphone test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicTestReport {
    /// Capture backend used
    pub backend: String,

    /// Length of the test window in milliseconds
    pub window_ms: u64,

    /// Blocks captured within the window
    pub blocks: usize,

    /// Blocks with any sample above the signal threshold
    pub voiced_blocks: usize,

    /// Highest peak across the window
    pub peak_level: f32,

    /// Peak of each block in capture order
    pub levels: Vec<f32>,
}

impl MicTestReport {
    /// Highest peak as a percentage, the way level meters display it
    pub fn peak_percent(&self) -> f32 {
        self.peak_level * 100.0
    }

    /// Whether the microphone delivered anything audible
    pub fn heard_signal(&self) -> bool {
        self.voiced_blocks > 0
    }
}
