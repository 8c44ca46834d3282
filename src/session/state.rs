use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one voice session
///
/// ```text
/// Idle ──▶ Authorizing ──▶ Streaming ──▶ Closing ──▶ Closed
///   │           │              │                       │
///   └───────────┴──────────────┴──── fault ──▶ Closed  └──▶ Authorizing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Never started
    Idle,
    /// Signing and opening the connection
    Authorizing,
    /// Sending one frame per captured block
    Streaming,
    /// Last frame sent, waiting for the final result
    Closing,
    /// All resources released; may start again
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Idle | Closed, Authorizing)
                | (Authorizing, Streaming)
                | (Streaming, Closing)
                | (Idle | Authorizing | Streaming | Closing, Closed)
        )
    }

    /// Whether a session currently owns capture or connection resources
    pub fn is_active(self) -> bool {
        matches!(self, Self::Authorizing | Self::Streaming | Self::Closing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Authorizing => "authorizing",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
