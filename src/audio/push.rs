// Host-fed capture backend
//
// The physical microphone often belongs to the embedding application (a
// desktop shell, a browser bridge, an audio server). The host keeps a
// `PushHandle`, reports whether access was granted, and pushes float blocks
// from its audio callback; the session sees an ordinary `AudioBackend`.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, CaptureConstraints, SampleBlock};
use crate::error::{VoiceError, VoiceResult};

#[derive(Debug, Default)]
struct Shared {
    tx: Option<mpsc::Sender<SampleBlock>>,
    denial: Option<VoiceError>,
    samples_pushed: u64,
    releases: usize,
}

/// Capture backend fed by the host through a [`PushHandle`]
pub struct PushBackend {
    constraints: CaptureConstraints,
    shared: Arc<Mutex<Shared>>,
    capturing: bool,
}

/// Host side of a [`PushBackend`]
#[derive(Debug, Clone)]
pub struct PushHandle {
    sample_rate: u32,
    shared: Arc<Mutex<Shared>>,
}

impl PushBackend {
    pub fn new(constraints: CaptureConstraints) -> (Self, PushHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let handle = PushHandle {
            sample_rate: constraints.sample_rate,
            shared: Arc::clone(&shared),
        };

        (
            Self {
                constraints,
                shared,
                capturing: false,
            },
            handle,
        )
    }
}

impl PushHandle {
    /// Push one block from the host's audio callback
    ///
    /// Never blocks. Returns `false` when capture is not running or the
    /// session is not keeping up, in which case the block is dropped.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        let mut shared = self.shared.lock();

        let Some(tx) = shared.tx.as_ref() else {
            return false;
        };

        let timestamp_ms = shared.samples_pushed * 1000 / self.sample_rate.max(1) as u64;
        let len = samples.len() as u64;

        match tx.try_send(SampleBlock::new(samples, self.sample_rate, timestamp_ms)) {
            Ok(()) => {
                shared.samples_pushed += len;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Capture queue full, dropping {} samples", len);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                shared.tx = None;
                false
            }
        }
    }

    /// Record that the host could not acquire the device
    ///
    /// The next `start()` fails with this error.
    pub fn fail_with(&self, error: VoiceError) {
        self.shared.lock().denial = Some(error);
    }

    /// Clear a previously reported acquisition failure
    pub fn grant(&self) {
        self.shared.lock().denial = None;
    }

    /// Signal end of input; the session drains and closes the stream
    pub fn finish(&self) {
        self.shared.lock().tx = None;
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().tx.is_some()
    }

    /// How many times the device was released by the backend
    pub fn release_count(&self) -> usize {
        self.shared.lock().releases
    }
}

#[async_trait::async_trait]
impl AudioBackend for PushBackend {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<SampleBlock>> {
        if self.capturing {
            return Err(VoiceError::SessionActive);
        }

        let mut shared = self.shared.lock();
        if let Some(denial) = shared.denial.clone() {
            return Err(denial);
        }

        let (tx, rx) = mpsc::channel(64);
        shared.tx = Some(tx);
        shared.samples_pushed = 0;
        self.capturing = true;

        info!(
            "Host capture opened ({}Hz, {} channel(s), {} samples/block)",
            self.constraints.sample_rate, self.constraints.channels, self.constraints.block_size
        );

        Ok(rx)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        if !self.capturing {
            debug!("Host capture already released");
            return Ok(());
        }

        let mut shared = self.shared.lock();
        shared.tx = None;
        shared.releases += 1;
        self.capturing = false;

        info!("Host capture released");

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "host push"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_before_start_is_dropped() {
        let (_backend, handle) = PushBackend::new(CaptureConstraints::default());
        assert!(!handle.push(vec![0.0; 16]));
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn test_pushed_blocks_carry_timestamps() {
        let (mut backend, handle) = PushBackend::new(CaptureConstraints::default());
        let mut rx = backend.start().await.unwrap();

        assert!(handle.push(vec![0.1; 1600]));
        assert!(handle.push(vec![0.2; 1600]));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.timestamp_ms, 0);
        assert_eq!(second.timestamp_ms, 100);
        assert_eq!(second.sample_rate, 16000);
    }

    #[tokio::test]
    async fn test_denial_is_reported_on_start() {
        let (mut backend, handle) = PushBackend::new(CaptureConstraints::default());
        handle.fail_with(VoiceError::PermissionDenied("user declined".into()));

        let err = backend.start().await.unwrap_err();
        assert!(matches!(err, VoiceError::PermissionDenied(_)));
        assert!(!backend.is_capturing());

        handle.grant();
        assert!(backend.start().await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (mut backend, handle) = PushBackend::new(CaptureConstraints::default());
        let mut rx = backend.start().await.unwrap();

        backend.stop().await.unwrap();
        backend.stop().await.unwrap();

        assert_eq!(handle.release_count(), 1);
        assert!(rx.recv().await.is_none(), "channel closes on release");
    }
}
