// Shared fixtures for integration tests
//
// The dictation service is replaced by an in-memory connector whose
// connections record every frame sent and replay scripted replies. Capture
// comes from `PushBackend` or WAV files written to a temp dir.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use travel_voice::session::{SessionConfig, VoiceEvent};
use travel_voice::transcription::{SpeechConnector, SpeechTransport};
use travel_voice::{Credentials, VoiceError, VoiceResult};
use url::Url;

pub const WAIT: Duration = Duration::from_secs(3);

/// Session config with valid credentials and a short closing grace
pub fn test_config() -> SessionConfig {
    SessionConfig {
        session_id: "test-session".to_string(),
        credentials: Credentials::new("test-app", "test-key", "test-secret"),
        closing_grace: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

/// Successful reply carrying the given words in the flat `ws` layout
pub fn result_message(words: &[&str], status: u8) -> String {
    let ws: Vec<Value> = words.iter().map(|w| json!({ "cw": [{ "w": w }] })).collect();
    let inner = serde_json::to_string(&json!({ "sn": 1, "ls": status == 2, "ws": ws })).unwrap();

    json!({
        "header": { "code": 0, "message": "success", "sid": "iat-test", "status": status },
        "payload": { "result": { "text": STANDARD.encode(inner.as_bytes()), "status": status, "seq": 1 } }
    })
    .to_string()
}

/// Failure reply with the given code and message
pub fn error_message(code: i64, message: &str) -> String {
    json!({ "header": { "code": code, "message": message } }).to_string()
}

/// Remote end of one fake connection
#[derive(Clone)]
pub struct Remote {
    sent: Arc<Mutex<Vec<String>>>,
    inbound: mpsc::UnboundedSender<Option<String>>,
    closed: Arc<AtomicBool>,
    pub url: Url,
}

impl Remote {
    /// Queue a message for the client
    pub fn reply(&self, message: impl Into<String>) {
        let _ = self.inbound.send(Some(message.into()));
    }

    /// Close the connection from the remote side
    pub fn hang_up(&self) {
        let _ = self.inbound.send(None);
    }

    /// Frames received so far, parsed
    pub fn frames(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// `header.status` of every frame received
    pub fn statuses(&self) -> Vec<u64> {
        self.frames()
            .iter()
            .map(|f| f["header"]["status"].as_u64().unwrap())
            .collect()
    }

    /// `payload.audio.seq` of every frame received
    pub fn seqs(&self) -> Vec<u64> {
        self.frames()
            .iter()
            .map(|f| f["payload"]["audio"]["seq"].as_u64().unwrap())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` frames arrived
    pub async fn wait_for_frames(&self, count: usize) {
        let sent = Arc::clone(&self.sent);
        tokio::time::timeout(WAIT, async move {
            while sent.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} frames"));
    }
}

struct FakeTransport {
    sent: Arc<Mutex<Vec<String>>>,
    inbound_tx: mpsc::UnboundedSender<Option<String>>,
    inbound: mpsc::UnboundedReceiver<Option<String>>,
    closed: Arc<AtomicBool>,
    finish_on_last: Option<String>,
    refuse_last: bool,
}

#[async_trait]
impl SpeechTransport for FakeTransport {
    async fn send(&mut self, text: String) -> VoiceResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::ConnectionFailed("connection closed".into()));
        }

        let frame: Value = serde_json::from_str(&text).unwrap();
        if frame["header"]["status"] == 2 && self.refuse_last {
            return Err(VoiceError::ConnectionFailed("socket closed".into()));
        }
        self.sent.lock().push(text);

        if frame["header"]["status"] == 2 {
            if let Some(reply) = &self.finish_on_last {
                let _ = self.inbound_tx.send(Some(reply.clone()));
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> VoiceResult<Option<String>> {
        Ok(self.inbound.recv().await.flatten())
    }

    async fn close(&mut self) -> VoiceResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory stand-in for the dictation service
#[derive(Default)]
pub struct FakeConnector {
    remotes: Mutex<Vec<Remote>>,
    refuse: Mutex<Option<VoiceError>>,
    finish_on_last: Mutex<Option<String>>,
    refuse_last: AtomicBool,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every connection attempt with `error`
    pub fn refuse_with(&self, error: VoiceError) {
        *self.refuse.lock() = Some(error);
    }

    /// Answer the last frame of every connection with `reply`
    pub fn finish_on_last(&self, reply: impl Into<String>) {
        *self.finish_on_last.lock() = Some(reply.into());
    }

    /// Fail the send of every last frame, as a socket that died under the client would
    pub fn refuse_last_frame(&self) {
        self.refuse_last.store(true, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.remotes.lock().len()
    }

    /// Remote end of the n-th connection
    pub fn remote(&self, index: usize) -> Remote {
        self.remotes.lock()[index].clone()
    }
}

#[async_trait]
impl SpeechConnector for FakeConnector {
    async fn connect(&self, url: &Url) -> VoiceResult<Box<dyn SpeechTransport>> {
        if let Some(error) = self.refuse.lock().clone() {
            return Err(error);
        }

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        self.remotes.lock().push(Remote {
            sent: Arc::clone(&sent),
            inbound: inbound_tx.clone(),
            closed: Arc::clone(&closed),
            url: url.clone(),
        });

        Ok(Box::new(FakeTransport {
            sent,
            inbound_tx,
            inbound,
            closed,
            finish_on_last: self.finish_on_last.lock().clone(),
            refuse_last: self.refuse_last.load(Ordering::SeqCst),
        }))
    }
}

/// Next listener event, failing the test after `WAIT`
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<VoiceEvent>) -> VoiceEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a listener event")
        .expect("listener channel closed")
}

/// Every event up to and including `Stopped`
pub async fn events_until_stopped(
    events: &mut mpsc::UnboundedReceiver<VoiceEvent>,
) -> Vec<VoiceEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let stopped = event == VoiceEvent::Stopped;
        seen.push(event);
        if stopped {
            return seen;
        }
    }
}

/// Write a mono or interleaved 16-bit WAV holding a constant-amplitude square wave
pub fn write_wav(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    frames: usize,
    amplitude: f32,
) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let level = (amplitude * i16::MAX as f32) as i16;
    for i in 0..frames {
        let sample = if (i / 20) % 2 == 0 { level } else { -level };
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();

    path
}
