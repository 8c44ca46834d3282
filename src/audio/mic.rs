// Microphone capture through the system audio host
//
// The device delivers whatever format it prefers; every callback is brought
// down to mono at the requested rate and cut into fixed-size blocks before it
// reaches the session. The cpal stream is not `Send`, so it lives on its own
// thread for as long as capture runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, CaptureConstraints, SampleBlock};
use super::convert::{resample_linear, to_mono, Rechunker};
use crate::error::{VoiceError, VoiceResult};

/// Blocks buffered between the device callback and the session
const CHANNEL_CAPACITY: usize = 64;

/// Capture backend reading from an audio input device
pub struct MicBackend {
    constraints: CaptureConstraints,
    /// Input device by name; the host default when unset
    device_name: Option<String>,
    capturing: Arc<AtomicBool>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl MicBackend {
    pub fn new(constraints: CaptureConstraints) -> Self {
        Self {
            constraints,
            device_name: None,
            capturing: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            worker: None,
        }
    }

    /// Capture from the named input device instead of the default one
    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicBackend {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<SampleBlock>> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(VoiceError::SessionActive);
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();

        let device_name = self.device_name.clone();
        let constraints = self.constraints.clone();
        let capturing = Arc::clone(&self.capturing);

        let worker = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match device::open_stream(device_name.as_deref(), &constraints, tx) {
                    Ok((stream, description)) => {
                        capturing.store(true, Ordering::SeqCst);
                        let _ = ready_tx.send(Ok(description));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Runs until stop() signals or drops the sender
                let _ = stop_rx.recv();
                drop(stream);
                capturing.store(false, Ordering::SeqCst);
                debug!("Microphone stream released");
            })
            .map_err(|e| {
                VoiceError::UnsupportedEnvironment(format!("failed to spawn capture thread: {e}"))
            })?;

        match ready_rx.await {
            Ok(Ok(description)) => {
                info!("Microphone capture started: {}", description);
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                Ok(rx)
            }
            Ok(Err(e)) => {
                warn!("Microphone capture failed to start: {}", e);
                Err(e)
            }
            Err(_) => Err(VoiceError::UnsupportedEnvironment(
                "capture thread exited during start".to_string(),
            )),
        }
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(worker) = self.worker.take() {
            let joined = tokio::task::spawn_blocking(move || worker.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Microphone capture thread did not exit cleanly");
            }
            info!("Microphone capture stopped");
        }

        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

/// Turns device callbacks into session blocks
struct BlockSink {
    channels: u16,
    source_rate: u32,
    target_rate: u32,
    chunker: Rechunker,
    tx: mpsc::Sender<SampleBlock>,
    /// Samples emitted so far, at the target rate
    emitted: u64,
    dropped: u64,
}

impl BlockSink {
    fn new(
        constraints: &CaptureConstraints,
        channels: u16,
        source_rate: u32,
        tx: mpsc::Sender<SampleBlock>,
    ) -> Self {
        Self {
            channels,
            source_rate,
            target_rate: constraints.sample_rate,
            chunker: Rechunker::new(constraints.block_size),
            tx,
            emitted: 0,
            dropped: 0,
        }
    }

    /// Accept one callback's worth of interleaved samples
    ///
    /// Never blocks: the audio thread must return promptly, so blocks are
    /// dropped when the session falls behind.
    fn push(&mut self, interleaved: &[f32]) {
        let mono = to_mono(interleaved, self.channels);
        let samples = resample_linear(&mono, self.source_rate, self.target_rate);

        for block in self.chunker.push(&samples) {
            let timestamp_ms = self.emitted * 1000 / self.target_rate.max(1) as u64;
            self.emitted += block.len() as u64;

            let block = SampleBlock::new(block, self.target_rate, timestamp_ms);
            if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(block) {
                self.dropped += 1;
                if self.dropped == 1 || self.dropped % 50 == 0 {
                    warn!("Session is behind capture, dropped {} blocks", self.dropped);
                }
            }
        }
    }
}

#[cfg(feature = "microphone")]
mod device {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{
        BuildStreamError, DefaultStreamConfigError, FromSample, PlayStreamError, SampleFormat,
        SizedSample,
    };
    use tokio::sync::mpsc;
    use tracing::{debug, warn};

    use super::BlockSink;
    use crate::audio::backend::{CaptureConstraints, SampleBlock};
    use crate::error::{VoiceError, VoiceResult};

    pub type Stream = cpal::Stream;

    /// Open and start the input stream; returns it with a description for logs
    pub fn open_stream(
        device_name: Option<&str>,
        constraints: &CaptureConstraints,
        tx: mpsc::Sender<SampleBlock>,
    ) -> VoiceResult<(Stream, String)> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| VoiceError::UnsupportedEnvironment(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| {
                    VoiceError::DeviceNotFound(format!("input device '{}' is not available", name))
                })?,
            None => host.default_input_device().ok_or_else(|| {
                VoiceError::DeviceNotFound(
                    "no default input device. Connect a microphone and try again".to_string(),
                )
            })?,
        };

        let name = device.name().unwrap_or_else(|_| "unknown device".to_string());
        let supported = device.default_input_config().map_err(config_error)?;
        let channels = supported.channels();
        let source_rate = supported.sample_rate().0;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        debug!(
            "Opening {} at {}Hz, {} channels, {:?}",
            name, source_rate, channels, format
        );

        let sink = BlockSink::new(constraints, channels, source_rate, tx);
        let stream = match format {
            SampleFormat::F32 => build::<f32>(&device, &config, sink)?,
            SampleFormat::I16 => build::<i16>(&device, &config, sink)?,
            SampleFormat::U16 => build::<u16>(&device, &config, sink)?,
            SampleFormat::I32 => build::<i32>(&device, &config, sink)?,
            other => {
                return Err(VoiceError::UnsupportedEnvironment(format!(
                    "sample format {:?} is not supported",
                    other
                )))
            }
        };

        stream.play().map_err(play_error)?;

        Ok((stream, format!("{} ({}Hz, {} ch)", name, source_rate, channels)))
    }

    fn build<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut sink: BlockSink,
    ) -> VoiceResult<Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let mut buffer = Vec::new();

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    buffer.clear();
                    buffer.extend(data.iter().map(|&s| f32::from_sample_(s)));
                    sink.push(&buffer);
                },
                |e| warn!("Microphone stream error: {}", e),
                None,
            )
            .map_err(build_error)
    }

    pub(super) fn config_error(e: DefaultStreamConfigError) -> VoiceError {
        match e {
            DefaultStreamConfigError::DeviceNotAvailable => {
                VoiceError::DeviceNotFound("input device was disconnected".to_string())
            }
            DefaultStreamConfigError::BackendSpecific { err } => {
                VoiceError::PermissionDenied(format!(
                    "{}. Allow microphone access for this application and try again",
                    err
                ))
            }
            other => VoiceError::UnsupportedEnvironment(other.to_string()),
        }
    }

    pub(super) fn build_error(e: BuildStreamError) -> VoiceError {
        match e {
            BuildStreamError::DeviceNotAvailable => {
                VoiceError::DeviceNotFound("input device was disconnected".to_string())
            }
            BuildStreamError::BackendSpecific { err } => VoiceError::PermissionDenied(format!(
                "{}. Allow microphone access for this application and try again",
                err
            )),
            other => VoiceError::UnsupportedEnvironment(other.to_string()),
        }
    }

    fn play_error(e: PlayStreamError) -> VoiceError {
        match e {
            PlayStreamError::DeviceNotAvailable => {
                VoiceError::DeviceNotFound("input device was disconnected".to_string())
            }
            other => VoiceError::PermissionDenied(other.to_string()),
        }
    }
}

#[cfg(not(feature = "microphone"))]
mod device {
    use tokio::sync::mpsc;

    use crate::audio::backend::{CaptureConstraints, SampleBlock};
    use crate::error::{VoiceError, VoiceResult};

    pub type Stream = ();

    pub fn open_stream(
        _device_name: Option<&str>,
        _constraints: &CaptureConstraints,
        _tx: mpsc::Sender<SampleBlock>,
    ) -> VoiceResult<(Stream, String)> {
        Err(VoiceError::UnsupportedEnvironment(
            "built without microphone support; pass a WAV file instead".to_string(),
        ))
    }
}
