use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::VoiceError;

/// Callbacks a session reports to
///
/// Called from the session's background task; implementations must not block.
pub trait VoiceListener: Send + Sync {
    /// A recognized fragment
    fn on_result(&self, text: &str, is_final: bool);

    /// A classified failure
    fn on_error(&self, error: &VoiceError);

    /// Teardown finished; fires once per started session
    fn on_stop(&self);
}

/// Listener callbacks as values
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Result { text: String, is_final: bool },
    Error(VoiceError),
    Stopped,
}

/// Forwards callbacks into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<VoiceEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<VoiceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl VoiceListener for ChannelListener {
    fn on_result(&self, text: &str, is_final: bool) {
        let _ = self.tx.send(VoiceEvent::Result {
            text: text.to_string(),
            is_final,
        });
    }

    fn on_error(&self, error: &VoiceError) {
        let _ = self.tx.send(VoiceEvent::Error(error.clone()));
    }

    fn on_stop(&self) {
        let _ = self.tx.send(VoiceEvent::Stopped);
    }
}

/// Logs callbacks; used where the session's own transcript is the output
#[derive(Debug, Clone)]
pub struct TracingListener {
    session_id: String,
}

impl TracingListener {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

impl VoiceListener for TracingListener {
    fn on_result(&self, text: &str, is_final: bool) {
        info!("[{}] result (final={}): {}", self.session_id, is_final, text);
    }

    fn on_error(&self, error: &VoiceError) {
        error!("[{}] {}", self.session_id, error);
    }

    fn on_stop(&self) {
        info!("[{}] voice session stopped", self.session_id);
    }
}
