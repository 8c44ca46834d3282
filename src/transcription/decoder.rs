use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use super::frame::FrameKind;
use super::messages::{InboundMessage, RecognitionResult, WordEntry};
use crate::error::{VoiceError, VoiceResult};

/// A decoded message from the dictation service
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionEvent {
    /// Remote status code; zero means success
    pub code: i64,
    /// Remote message (error description on failure)
    pub message: String,
    /// Remote session id
    pub sid: Option<String>,
    /// Remote frame status; `2` marks the terminal event
    pub status: Option<u8>,
    /// Recognized fragment, when the message carried one
    pub text: Option<String>,
    /// Every fragment is reported as final
    pub is_final: bool,
    /// The message's `payload` as received
    pub raw: serde_json::Value,
}

impl TranscriptionEvent {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn is_terminal(&self) -> bool {
        self.status == Some(FrameKind::Last.status())
    }

    /// Recognition failure reported by the remote, if any
    pub fn error(&self) -> Option<VoiceError> {
        (!self.is_success()).then(|| VoiceError::RecognitionError(self.message.clone()))
    }
}

/// Decode one inbound text message
///
/// Fails with `DecodeError` only when the message itself is not valid JSON.
/// A failure message (non-zero code) is returned as-is without looking at its
/// payload. A payload whose inner result cannot be decoded is logged and
/// yields an event without text, so the terminal flag still takes effect.
pub fn decode(message: &str) -> VoiceResult<TranscriptionEvent> {
    let value: serde_json::Value =
        serde_json::from_str(message).map_err(|e| VoiceError::DecodeError(e.to_string()))?;
    let inbound: InboundMessage = serde_json::from_value(value.clone())
        .map_err(|e| VoiceError::DecodeError(e.to_string()))?;

    let header = inbound.header.unwrap_or_default();
    let raw = value.get("payload").cloned().unwrap_or(serde_json::Value::Null);

    let mut event = TranscriptionEvent {
        code: header.code,
        message: header.message,
        sid: header.sid,
        status: header.status,
        text: None,
        is_final: true,
        raw,
    };

    if !event.is_success() {
        return Ok(event);
    }

    let encoded = inbound
        .payload
        .and_then(|p| p.result)
        .map(|r| r.text)
        .unwrap_or_default();

    if !encoded.is_empty() {
        match extract_text(&encoded) {
            Ok(text) => event.text = text,
            Err(e) => warn!("Failed to decode recognition result: {}", e),
        }
    }

    Ok(event)
}

/// Decode the base64 inner result block and assemble its words
fn extract_text(encoded: &str) -> Result<Option<String>, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64: {e}"))?;

    // Each byte becomes one char, so multi-byte UTF-8 survives parsing as
    // raw byte values and is re-packed below.
    let binary: String = bytes.iter().map(|&b| b as char).collect();
    let result: RecognitionResult =
        serde_json::from_str(&binary).map_err(|e| format!("invalid result JSON: {e}"))?;

    debug!("Recognition result sn={:?} ls={:?}", result.sn, result.ls);

    let assembled = assemble_words(&result);
    if assembled.is_empty() {
        return Ok(None);
    }

    Ok(Some(repack_utf8(&assembled)))
}

/// Concatenate the first candidate of every word in document order
///
/// The flat `ws` layout wins whenever it is present, even if empty.
pub fn assemble_words(result: &RecognitionResult) -> String {
    fn push_words(out: &mut String, words: &[WordEntry]) {
        for word in words {
            if let Some(best) = word.best() {
                out.push_str(best);
            }
        }
    }

    let mut out = String::new();

    if let Some(words) = &result.ws {
        push_words(&mut out, words);
    } else if let Some(sentences) = result
        .cn
        .as_ref()
        .and_then(|cn| cn.st.as_ref())
        .and_then(|st| st.rt.as_ref())
    {
        for sentence in sentences {
            push_words(&mut out, &sentence.ws);
        }
    }

    out
}

/// Re-decode chars carrying raw byte values as UTF-8
///
/// Falls back to the input when the packed bytes are not valid UTF-8 (for
/// example when the words were already proper Unicode).
pub fn repack_utf8(text: &str) -> String {
    let bytes: Vec<u8> = text.chars().map(|c| (c as u32 & 0xFF) as u8).collect();
    match String::from_utf8(bytes) {
        Ok(decoded) => decoded,
        Err(_) => {
            debug!("UTF-8 re-decode failed, keeping raw fragment");
            text.to_string()
        }
    }
}
