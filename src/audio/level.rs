// Input level metering
//
// Peak amplitude per block, published through a watch channel so a UI (or
// the HTTP status endpoint) can sample the most recent level without
// back-pressuring the capture path. Advisory only.

use tokio::sync::watch;

/// Amplitude above which a block is considered to carry signal
pub const SIGNAL_THRESHOLD: f32 = 0.01;

/// Largest absolute sample value in the block
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples
        .iter()
        .filter(|s| !s.is_nan())
        .fold(0.0f32, |peak, s| peak.max(s.abs()))
}

/// Whether any sample rises above the signal threshold
pub fn has_signal(samples: &[f32]) -> bool {
    samples.iter().any(|s| s.abs() > SIGNAL_THRESHOLD)
}

/// Publishes the peak level of the most recent block
#[derive(Debug)]
pub struct LevelMeter {
    tx: watch::Sender<f32>,
}

impl LevelMeter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0.0);
        Self { tx }
    }

    /// Record a block and return its peak
    pub fn observe(&self, samples: &[f32]) -> f32 {
        let peak = peak_amplitude(samples);
        self.tx.send_replace(peak);
        peak
    }

    /// Most recent peak
    pub fn current(&self) -> f32 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.tx.subscribe()
    }

    pub fn reset(&self) {
        self.tx.send_replace(0.0);
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_amplitude() {
        assert_eq!(peak_amplitude(&[]), 0.0);
        assert_eq!(peak_amplitude(&[0.1, -0.7, 0.3]), 0.7);
        // Out-of-range input is reported as-is; metering does not clamp
        assert_eq!(peak_amplitude(&[1.5, -2.0]), 2.0);
        assert_eq!(peak_amplitude(&[f32::NAN, 0.25]), 0.25);
    }

    #[test]
    fn test_has_signal() {
        assert!(!has_signal(&[0.0, 0.005, -0.009]));
        assert!(has_signal(&[0.0, -0.02]));
    }

    #[test]
    fn test_meter_tracks_latest_block() {
        let meter = LevelMeter::new();
        let rx = meter.subscribe();

        assert_eq!(meter.observe(&[0.5, -0.25]), 0.5);
        assert_eq!(meter.observe(&[0.1]), 0.1);
        assert_eq!(meter.current(), 0.1);
        assert_eq!(*rx.borrow(), 0.1);

        meter.reset();
        assert_eq!(meter.current(), 0.0);
    }
}
