pub mod backend;
pub mod convert;
pub mod file;
pub mod level;
pub mod mic;
pub mod push;

pub use backend::{AudioBackend, CaptureConstraints, SampleBlock};
pub use file::{AudioFile, FileBackend};
pub use level::{has_signal, peak_amplitude, LevelMeter};
pub use mic::MicBackend;
pub use push::{PushBackend, PushHandle};
