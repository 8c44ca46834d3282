use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::level::peak_amplitude;
use crate::error::VoiceResult;

/// One fixed-size block of captured audio (mono, floating-point in [-1, 1])
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    /// Captured samples; upstream gain may push values outside [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl SampleBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32, timestamp_ms: u64) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp_ms,
        }
    }

    /// Peak absolute amplitude of this block
    pub fn peak(&self) -> f32 {
        peak_amplitude(&self.samples)
    }

    /// Duration of the block in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Constraints requested from the capture device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    /// Target sample rate (will resample if needed)
    pub sample_rate: u32,
    /// Target channel count (1 = mono)
    pub channels: u16,
    /// Bits per sample on the wire
    pub sample_size: u16,
    /// Samples per block delivered to the session
    pub block_size: usize,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // 16kHz for dictation
            channels: 1,        // Mono
            sample_size: 16,
            block_size: 4096,
        }
    }
}

impl CaptureConstraints {
    /// Wall-clock length of one block in milliseconds
    pub fn block_duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.block_size as u64 * 1000 / self.sample_rate as u64
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: the system's audio input device
/// - File: stream a WAV file as if it were a microphone (CLI, HTTP API, testing)
/// - Push: the host application owns the device and pushes blocks in
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive sample blocks. The
    /// channel closes when the source is exhausted or capture is stopped.
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<SampleBlock>>;

    /// Stop capturing audio and release the device
    ///
    /// Must be safe to call repeatedly and before `start`.
    async fn stop(&mut self) -> VoiceResult<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}
