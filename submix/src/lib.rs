//! # Submix Audio Mixing Engine
//!
//! Real-time multi-port PCM mixer: producers write PCM into input ports, a
//! dedicated mixing thread wakes once per output period, mixes whatever the
//! ports have staged and hands the result to a physical sink.
//!
//! **Architecture:** per-port SPSC ring buffers (ringbuf) feeding one mixing
//! thread whose tick runs control → read → mix → write, in that order.
//!
//! - [`mixer::AudioMixer`]: port table, output port, thread lifecycle
//! - [`mixer::InputPort`]: ring buffer, state machine, presentation counters
//! - [`mixer::OutputPort`]: mixed-result buffer in front of a [`audio::PcmSink`]
//! - [`mixer::FadeController`] and [`mixer::HwsyncBudgets`]: per-port DSP state

pub mod audio;
pub mod config;
pub mod error;
pub mod mixer;

pub use config::MixerConfig;
pub use error::{MixerError, Result};
pub use mixer::AudioMixer;
pub use submix_common::{PcmConfig, SampleFormat};
