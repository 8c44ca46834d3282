use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::listener::VoiceListener;
use super::state::SessionState;
use super::stats::{MicTestReport, SessionStats, TranscriptSegment};
use crate::audio::{has_signal, AudioBackend, LevelMeter, SampleBlock};
use crate::error::{VoiceError, VoiceResult};
use crate::transcription::{
    decode, AudioFrame, AuthorizationContext, FrameEncoder, SpeechConnector, SpeechTransport,
};

/// Window used by the microphone self-test
pub const DEFAULT_MIC_TEST_WINDOW: Duration = Duration::from_secs(5);

/// Mutable session bookkeeping shared with the pump task
#[derive(Debug)]
struct Shared {
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    frames_sent: u64,
    blocks_captured: u64,
    transcript: Vec<TranscriptSegment>,
    last_error: Option<VoiceError>,
    /// The remote reported a recognition failure in this session
    recognition_failed: bool,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            started_at: None,
            ended_at: None,
            frames_sent: 0,
            blocks_captured: 0,
            transcript: Vec::new(),
            last_error: None,
            recognition_failed: false,
        }
    }

    fn transition(&mut self, next: SessionState, session_id: &str) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "[{}] ignoring illegal transition {} -> {}",
                session_id, self.state, next
            );
            return false;
        }

        debug!("[{}] {} -> {}", session_id, self.state, next);
        self.state = next;
        if next == SessionState::Closed {
            self.ended_at = Some(Utc::now());
        }
        true
    }
}

/// Handle to a running pump task
struct Control {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A voice session: one capture stream feeding one dictation connection
///
/// At most one session runs at a time. The capture backend and the
/// connection are moved into a background task ("pump") for the lifetime of
/// the session and released there on every exit path.
pub struct VoiceSession {
    /// Session configuration
    config: SessionConfig,

    /// Opens dictation connections
    connector: Arc<dyn SpeechConnector>,

    /// Receives results, errors and the stop notification
    listener: Arc<dyn VoiceListener>,

    /// State, counters and transcript
    shared: Arc<Mutex<Shared>>,

    /// Set once teardown was requested by the caller
    stopping: Arc<AtomicBool>,

    /// Peak level of the most recent block
    level: Arc<LevelMeter>,

    /// Pump task of the current session
    control: tokio::sync::Mutex<Option<Control>>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn SpeechConnector>,
        listener: Arc<dyn VoiceListener>,
    ) -> Self {
        info!("Creating voice session: {}", config.session_id);

        Self {
            config,
            connector,
            listener,
            shared: Arc::new(Mutex::new(Shared::new())),
            stopping: Arc::new(AtomicBool::new(false)),
            level: Arc::new(LevelMeter::new()),
            control: tokio::sync::Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start capturing and streaming
    ///
    /// Returns once the first frame is on the wire. Any failure on the way
    /// there releases what was acquired, leaves the session `Closed`, is
    /// reported to the listener (`on_error` then `on_stop`) and returned.
    pub async fn start(&self, mut backend: Box<dyn AudioBackend>) -> VoiceResult<()> {
        let mut control = self.control.lock().await;

        if self.shared.lock().state.is_active() {
            warn!("[{}] voice session already active", self.session_id());
            return Err(VoiceError::SessionActive);
        }

        if let Some(previous) = control.take() {
            if let Err(e) = previous.task.await {
                error!("[{}] previous pump task failed: {}", self.session_id(), e);
            }
        }

        info!(
            "[{}] starting voice session with {} capture",
            self.session_id(),
            backend.name()
        );

        self.stopping.store(false, Ordering::SeqCst);
        self.level.reset();
        {
            let mut shared = self.shared.lock();
            let state = shared.state;
            *shared = Shared::new();
            shared.state = state;
            shared.started_at = Some(Utc::now());
        }

        // Credentials and capture are checked before leaving Idle/Closed so
        // that a rejected start goes straight to Closed.
        if let Err(e) = self.config.credentials.validate() {
            return Err(self.abort(backend.as_mut(), None, e).await);
        }

        let audio_rx = match backend.start().await {
            Ok(rx) => rx,
            Err(e) => return Err(self.abort(backend.as_mut(), None, e).await),
        };

        self.shared
            .lock()
            .transition(SessionState::Authorizing, self.session_id());

        let auth = match AuthorizationContext::new(
            &self.config.credentials,
            &self.config.host,
            &self.config.path,
        ) {
            Ok(auth) => auth,
            Err(e) => return Err(self.abort(backend.as_mut(), None, e).await),
        };

        info!(
            "[{}] connecting to {}",
            self.session_id(),
            auth.masked_url()
        );

        let mut transport = match self.connector.connect(&auth.url).await {
            Ok(transport) => transport,
            Err(e) => return Err(self.abort(backend.as_mut(), None, e).await),
        };

        let encoder = FrameEncoder::new(
            auth.app_id.clone(),
            self.config.constraints.sample_rate,
            self.config.params.clone(),
        );

        // The opening frame is labelled 1 without consuming a sequence
        // number; continuation frames count up from 1 on their own.
        let first = encoder.first(1);
        let sent = send_frame(&encoder, transport.as_mut(), &first, &self.shared).await;
        if let Err(e) = sent {
            return Err(self.abort(backend.as_mut(), Some(&mut transport), e).await);
        }

        self.shared
            .lock()
            .transition(SessionState::Streaming, self.session_id());

        let (stop_tx, stop_rx) = oneshot::channel();
        let pump = Pump {
            session_id: self.config.session_id.clone(),
            encoder,
            transport,
            backend,
            audio_rx,
            shared: Arc::clone(&self.shared),
            stopping: Arc::clone(&self.stopping),
            level: Arc::clone(&self.level),
            listener: Arc::clone(&self.listener),
            response_timeout: self.config.response_timeout,
            closing_grace: self.config.closing_grace,
            seq: 0,
        };

        let task = tokio::spawn(pump.run(stop_rx));
        *control = Some(Control { stop_tx, task });

        info!("[{}] voice session streaming", self.session_id());

        Ok(())
    }

    /// Release whatever `start` acquired and report the failure
    async fn abort(
        &self,
        backend: &mut dyn AudioBackend,
        transport: Option<&mut Box<dyn SpeechTransport>>,
        err: VoiceError,
    ) -> VoiceError {
        error!("[{}] failed to start: {}", self.session_id(), err);

        release(self.session_id(), backend, transport).await;

        {
            let mut shared = self.shared.lock();
            // A restart that fails early is already Closed
            if shared.state != SessionState::Closed {
                shared.transition(SessionState::Closed, self.session_id());
            }
            shared.ended_at = Some(Utc::now());
            shared.last_error = Some(err.clone());
        }

        self.listener.on_error(&err);
        self.listener.on_stop();

        err
    }

    /// Stop the session and wait for teardown
    ///
    /// Idempotent: stopping an idle, closed or already stopping session
    /// returns the current statistics without notifying the listener again.
    pub async fn stop(&self) -> SessionStats {
        let mut control = self.control.lock().await;

        match control.take() {
            Some(Control { stop_tx, task }) => {
                info!("[{}] stopping voice session", self.session_id());

                self.stopping.store(true, Ordering::SeqCst);
                // The pump may already be gone after a fault
                let _ = stop_tx.send(());

                if let Err(e) = task.await {
                    error!("[{}] pump task failed: {}", self.session_id(), e);
                }
            }
            None => {
                debug!("[{}] no voice session to stop", self.session_id());
            }
        }

        self.stats()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Peak level of the most recent block
    pub fn audio_level(&self) -> f32 {
        self.level.current()
    }

    /// Follow the level meter
    pub fn subscribe_level(&self) -> watch::Receiver<f32> {
        self.level.subscribe()
    }

    /// Get current session statistics
    pub fn stats(&self) -> SessionStats {
        let shared = self.shared.lock();

        let duration_secs = match shared.started_at {
            Some(started) => {
                let end = shared.ended_at.unwrap_or_else(Utc::now);
                end.signed_duration_since(started).num_milliseconds().max(0) as f64 / 1000.0
            }
            None => 0.0,
        };

        SessionStats {
            session_id: self.config.session_id.clone(),
            state: shared.state,
            is_recording: shared.state.is_active(),
            started_at: shared.started_at,
            duration_secs,
            frames_sent: shared.frames_sent,
            blocks_captured: shared.blocks_captured,
            transcript_segments_count: shared.transcript.len(),
            audio_level: self.level.current(),
            last_error: shared.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Get accumulated transcript
    pub fn transcript(&self) -> Vec<TranscriptSegment> {
        self.shared.lock().transcript.clone()
    }

    /// Concatenated transcript text
    pub fn transcript_text(&self) -> String {
        self.shared
            .lock()
            .transcript
            .iter()
            .map(|segment| segment.text.as_str())
            .collect()
    }

    /// Capture-only microphone test; opens no connection
    ///
    /// Refused while a session holds the capture device.
    pub async fn mic_test(
        &self,
        mut backend: Box<dyn AudioBackend>,
        window: Duration,
    ) -> VoiceResult<MicTestReport> {
        let _control = self.control.lock().await;

        if self.shared.lock().state.is_active() {
            return Err(VoiceError::SessionActive);
        }

        run_mic_test(backend.as_mut(), window, &self.level).await
    }
}

/// Capture for `window`, metering every block, then release the device
pub async fn run_mic_test(
    backend: &mut dyn AudioBackend,
    window: Duration,
    level: &LevelMeter,
) -> VoiceResult<MicTestReport> {
    info!(
        "Microphone test: {} capture for {}ms",
        backend.name(),
        window.as_millis()
    );

    let mut audio_rx = backend.start().await?;
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    let mut levels = Vec::new();
    let mut voiced_blocks = 0;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            block = audio_rx.recv() => match block {
                Some(block) => {
                    levels.push(level.observe(&block.samples));
                    if has_signal(&block.samples) {
                        voiced_blocks += 1;
                    }
                }
                None => break,
            },
        }
    }

    if let Err(e) = backend.stop().await {
        warn!("Failed to release capture after microphone test: {}", e);
    }

    let peak_level = levels.iter().copied().fold(0.0f32, f32::max);
    info!(
        "Microphone test finished: {} blocks, peak {:.1}%",
        levels.len(),
        peak_level * 100.0
    );

    Ok(MicTestReport {
        backend: backend.name().to_string(),
        window_ms: window.as_millis() as u64,
        blocks: levels.len(),
        voiced_blocks,
        peak_level,
        levels,
    })
}

/// Serialize and send one frame, counting it
async fn send_frame(
    encoder: &FrameEncoder,
    transport: &mut dyn SpeechTransport,
    frame: &AudioFrame,
    shared: &Mutex<Shared>,
) -> VoiceResult<()> {
    let json = encoder.to_json(frame)?;
    transport.send(json).await?;
    shared.lock().frames_sent += 1;
    Ok(())
}

/// Stop capture and close the connection, logging failures
async fn release(
    session_id: &str,
    backend: &mut dyn AudioBackend,
    transport: Option<&mut Box<dyn SpeechTransport>>,
) {
    if let Err(e) = backend.stop().await {
        warn!("[{}] failed to release capture: {}", session_id, e);
    }

    if let Some(transport) = transport {
        if let Err(e) = transport.close().await {
            warn!("[{}] failed to close connection: {}", session_id, e);
        }
    }
}

/// Resolves at `deadline`, or never
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// What woke the pump
enum Step {
    Stop,
    Inbound(VoiceResult<Option<String>>),
    Audio(Option<SampleBlock>),
    Silence,
}

/// Why streaming ended
#[derive(Debug, PartialEq, Eq)]
enum Ending {
    /// Caller asked to stop
    Stopped,
    /// Capture stream ran out
    CaptureEnded,
    /// Remote sent its terminal event
    RemoteTerminal,
    /// Remote went away after reporting a recognition error, or while stopping
    RemoteClosed,
    Fault(VoiceError),
}

/// Moves captured blocks to the connection and inbound events to the listener
struct Pump {
    session_id: String,
    encoder: FrameEncoder,
    transport: Box<dyn SpeechTransport>,
    backend: Box<dyn AudioBackend>,
    audio_rx: mpsc::Receiver<SampleBlock>,
    shared: Arc<Mutex<Shared>>,
    stopping: Arc<AtomicBool>,
    level: Arc<LevelMeter>,
    listener: Arc<dyn VoiceListener>,
    response_timeout: Option<Duration>,
    closing_grace: Duration,
    /// Last sequence number used
    seq: u32,
}

impl Pump {
    async fn run(mut self, stop_rx: oneshot::Receiver<()>) {
        debug!("[{}] pump started", self.session_id);

        let ending = self.stream(stop_rx).await;
        debug!("[{}] streaming ended: {:?}", self.session_id, ending);

        let fault = match ending {
            Ending::Stopped | Ending::CaptureEnded => {
                self.close_gracefully().await;
                None
            }
            Ending::RemoteTerminal | Ending::RemoteClosed => None,
            Ending::Fault(e) => Some(e),
        };

        release(
            &self.session_id,
            self.backend.as_mut(),
            Some(&mut self.transport),
        )
        .await;

        {
            let mut shared = self.shared.lock();
            shared.transition(SessionState::Closed, &self.session_id);
            if let Some(e) = &fault {
                shared.last_error = Some(e.clone());
            }
        }
        self.level.reset();

        if let Some(e) = &fault {
            error!("[{}] voice session failed: {}", self.session_id, e);
            self.listener.on_error(e);
        }

        info!("[{}] voice session closed", self.session_id);
        self.listener.on_stop();
    }

    /// Streaming phase: one continuation frame per block until something ends it
    async fn stream(&mut self, mut stop_rx: oneshot::Receiver<()>) -> Ending {
        let mut deadline = self.response_timeout.map(|limit| Instant::now() + limit);

        loop {
            let step = tokio::select! {
                biased;
                _ = &mut stop_rx => Step::Stop,
                inbound = self.transport.recv() => Step::Inbound(inbound),
                block = self.audio_rx.recv() => Step::Audio(block),
                _ = wait_until(deadline) => Step::Silence,
            };

            match step {
                Step::Stop => return Ending::Stopped,
                Step::Audio(Some(block)) => {
                    if let Err(e) = self.send_block(&block).await {
                        return Ending::Fault(e);
                    }
                }
                Step::Audio(None) => {
                    info!("[{}] capture stream ended", self.session_id);
                    return Ending::CaptureEnded;
                }
                Step::Inbound(Ok(Some(message))) => {
                    deadline = self.response_timeout.map(|limit| Instant::now() + limit);
                    if self.handle_message(&message) {
                        info!("[{}] remote finished the session", self.session_id);
                        return Ending::RemoteTerminal;
                    }
                }
                Step::Inbound(Ok(None)) => {
                    if self.stopping.load(Ordering::SeqCst)
                        || self.shared.lock().recognition_failed
                    {
                        debug!("[{}] remote closed the connection", self.session_id);
                        return Ending::RemoteClosed;
                    }
                    return Ending::Fault(VoiceError::ConnectionFailed(
                        "connection closed by remote".to_string(),
                    ));
                }
                Step::Inbound(Err(e)) => return Ending::Fault(e),
                Step::Silence => {
                    let limit = self.response_timeout.unwrap_or_default();
                    return Ending::Fault(VoiceError::ConnectionFailed(format!(
                        "no response from service within {}ms",
                        limit.as_millis()
                    )));
                }
            }
        }
    }

    async fn send_block(&mut self, block: &SampleBlock) -> VoiceResult<()> {
        self.level.observe(&block.samples);
        self.shared.lock().blocks_captured += 1;

        let Some(frame) = self.encoder.continuation(&block.samples, self.seq + 1) else {
            return Ok(());
        };
        self.seq += 1;

        send_frame(
            &self.encoder,
            self.transport.as_mut(),
            &frame,
            &self.shared,
        )
        .await
    }

    /// Closing phase: send the last frame and wait briefly for the final result
    ///
    /// A connection that already went away is not a fault here; the session
    /// was ending anyway.
    async fn close_gracefully(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shared
            .lock()
            .transition(SessionState::Closing, &self.session_id);

        self.seq += 1;
        let last = self.encoder.last(self.seq);
        let sent = send_frame(
            &self.encoder,
            self.transport.as_mut(),
            &last,
            &self.shared,
        )
        .await;
        if let Err(e) = sent {
            debug!("[{}] last frame not delivered: {}", self.session_id, e);
            return;
        }

        let grace = self.closing_grace;
        let drain = async {
            loop {
                match self.transport.recv().await {
                    Ok(Some(message)) => {
                        if self.handle_message(&message) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("[{}] connection error while closing: {}", self.session_id, e);
                        break;
                    }
                }
            }
        };

        if timeout(grace, drain).await.is_err() {
            debug!(
                "[{}] no final result within {}ms, closing",
                self.session_id,
                grace.as_millis()
            );
        }
    }

    /// Handle one inbound message; returns whether it was terminal
    fn handle_message(&self, message: &str) -> bool {
        let event = match decode(message) {
            Ok(event) => event,
            Err(e) => {
                warn!("[{}] dropping inbound message: {}", self.session_id, e);
                return false;
            }
        };

        if let Some(err) = event.error() {
            warn!(
                "[{}] remote error {}: {}",
                self.session_id, event.code, event.message
            );
            {
                let mut shared = self.shared.lock();
                shared.recognition_failed = true;
                shared.last_error = Some(err.clone());
            }
            self.listener.on_error(&err);
            return false;
        }

        if let Some(text) = event.text.as_deref().filter(|text| !text.is_empty()) {
            debug!("[{}] result: {}", self.session_id, text);
            self.shared.lock().transcript.push(TranscriptSegment {
                text: text.to_string(),
                timestamp: Utc::now(),
                is_final: event.is_final,
            });
            self.listener.on_result(text, event.is_final);
        }

        event.is_terminal()
    }
}
