//! Mixing engine
//!
//! ```text
//! producer ─write─> InputPort(system) ─┐
//!                                      ├─ tick: control → stage → mix → write ─> OutputPort ─> PcmSink
//! producer ─write─> InputPort(direct) ─┘        (hwsync insert/skip, fades)
//! ```
//!
//! The tick order is fixed: control messages are applied before data is
//! staged, staging precedes mixing, and mixing precedes the output write.

mod clock;
mod core;
mod device;
mod dsp;
mod engine;
mod fade;
mod hwsync;
mod input_port;
mod observer;
mod output_port;
mod policy;
mod snapshot;
mod thread;
mod types;

pub use self::core::AudioMixer;
pub use clock::PacingClock;
pub use device::{ChannelMapper, HostDevice};
pub use dsp::{apply_gain, extend_channels, normalize_into};
pub use engine::{MixEngine, TickReport, TickRunner, CONTINUOUS_SILENCE_FRAMES};
pub use fade::{FadeController, FadeDirection};
pub use hwsync::{aligned_offset, drift_to_bytes, Correction, HwsyncBudgets};
pub use input_port::{InputPort, PortOptions, StageOutcome, MESSAGE_QUEUE_CAPACITY};
pub use observer::{HwsyncHeader, HwsyncMetadataProvider, PortObserver};
pub use output_port::OutputPort;
pub use policy::{Pcm16Policy, Pcm32Policy, SampleFormatPolicy};
pub use snapshot::{MixerSnapshot, OutputSnapshot, PortSnapshot};
pub use types::{
    DrainKind, MixerState, OutputFlags, PortMessage, PortSlot, PortState, RunState, Transition,
    PORT_SLOT_COUNT,
};
