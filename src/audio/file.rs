use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackend, CaptureConstraints, SampleBlock};
use super::convert::{int_to_f32, resample_linear, to_mono, Rechunker};
use crate::error::{VoiceError, VoiceResult};

/// Decoded contents of a WAV file, already converted to mono floating point
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> VoiceResult<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).map_err(|e| map_wav_error(path, e))?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| map_wav_error(path, e))?,
            SampleFormat::Int => reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| int_to_f32(v, spec.bits_per_sample)))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| map_wav_error(path, e))?,
        };

        let samples = to_mono(&interleaved, spec.channels);
        let duration_seconds = samples.len() as f64 / spec.sample_rate.max(1) as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            interleaved.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples resampled to the requested rate
    pub fn resampled(&self, target_rate: u32) -> Vec<f32> {
        resample_linear(&self.samples, self.sample_rate, target_rate)
    }
}

fn map_wav_error(path: &Path, e: hound::Error) -> VoiceError {
    let path = path.display();
    match e {
        hound::Error::IoError(io) => match io.kind() {
            std::io::ErrorKind::NotFound => {
                VoiceError::DeviceNotFound(format!("audio file {path} not found"))
            }
            std::io::ErrorKind::PermissionDenied => {
                VoiceError::PermissionDenied(format!("cannot read audio file {path}"))
            }
            _ => VoiceError::UnsupportedEnvironment(format!("failed to read {path}: {io}")),
        },
        other => VoiceError::UnsupportedEnvironment(format!("unreadable WAV input {path}: {other}")),
    }
}

/// Capture backend that plays a WAV file into the session
///
/// Blocks are cut to the configured block size. With `realtime` enabled the
/// blocks are paced at the rate a microphone would deliver them, otherwise
/// they are sent as fast as the session consumes them. The receiver closes
/// once the file is exhausted.
pub struct FileBackend {
    path: PathBuf,
    constraints: CaptureConstraints,
    realtime: bool,
    task: Option<JoinHandle<()>>,
    capturing: bool,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, constraints: CaptureConstraints) -> Self {
        Self {
            path: path.into(),
            constraints,
            realtime: false,
            task: None,
            capturing: false,
        }
    }

    /// Pace blocks at capture speed instead of sending them back to back
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<SampleBlock>> {
        if self.capturing {
            return Err(VoiceError::SessionActive);
        }

        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .map_err(|e| VoiceError::UnsupportedEnvironment(format!("decoder task failed: {e}")))??;

        let sample_rate = self.constraints.sample_rate;
        let samples = audio.resampled(sample_rate);

        let mut chunker = Rechunker::new(self.constraints.block_size);
        let mut blocks = chunker.push(&samples);
        blocks.extend(chunker.flush());

        info!(
            "Streaming {} as {} blocks of {} samples ({}Hz, realtime={})",
            audio.path,
            blocks.len(),
            self.constraints.block_size,
            sample_rate,
            self.realtime
        );

        let (tx, rx) = mpsc::channel(100);
        let pace = self
            .realtime
            .then(|| Duration::from_millis(self.constraints.block_duration_ms().max(1)));

        let task = tokio::spawn(async move {
            let mut timestamp_ms = 0u64;
            let mut ticker = pace.map(tokio::time::interval);

            for samples in blocks {
                if let Some(ticker) = ticker.as_mut() {
                    ticker.tick().await;
                }

                let block = SampleBlock::new(samples, sample_rate, timestamp_ms);
                timestamp_ms += block.duration_ms();

                if tx.send(block).await.is_err() {
                    debug!("File capture receiver dropped");
                    return;
                }
            }

            debug!("File capture exhausted after {}ms", timestamp_ms);
        });

        self.task = Some(task);
        self.capturing = true;

        Ok(rx)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        if self.capturing {
            info!("File capture stopped: {}", self.path.display());
        }
        self.capturing = false;

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
