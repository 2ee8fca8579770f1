//! Audio endpoints around the mixer: sinks and test sources

pub mod sink;
pub mod tone;
pub mod wav_sink;

pub use sink::{HardwareTimestamp, NullSink, PcmSink};
pub use tone::ToneGenerator;
pub use wav_sink::WavSink;
