//! Host device context passed to the mixer at construction
//!
//! Holds the device-wide knobs the mixing tick consults: speaker gain,
//! pass-through ownership of the output, debug dumps and an optional channel
//! mapping stage. Shared between the host and the mixer via `Arc`.

use crate::error::{MixerError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info};

/// Post-process stage replacing the default 2→N channel layout
///
/// Works in the 32-bit full-scale domain: `stereo` holds `frames` interleaved
/// L/R samples, `out` receives `frames * out_channels` samples.
pub trait ChannelMapper: Send {
    fn map(&mut self, stereo: &[i32], frames: usize, out: &mut [i32], out_channels: usize);

    fn name(&self) -> &str {
        "custom"
    }
}

/// Device-wide state consulted by every tick
pub struct HostDevice {
    /// Sink gain as f32 bits
    sink_gain: AtomicU32,

    /// Speaker gain stage enabled (TV products)
    speaker_gain_enabled: AtomicBool,

    /// An external pass-through path owns the sink; the mixer must not write
    passthrough_active: AtomicBool,

    /// Verbose per-tick logging
    debug: AtomicBool,

    mapper: Mutex<Option<Box<dyn ChannelMapper>>>,
}

impl std::fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDevice")
            .field("sink_gain", &self.sink_gain())
            .field("speaker_gain_enabled", &self.speaker_gain_enabled())
            .field("passthrough_active", &self.passthrough_active())
            .field("debug", &self.debug_enabled())
            .field("mapper", &self.mapper.lock().as_ref().map(|m| m.name().to_string()))
            .finish()
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    /// Unity gain, gain stage disabled, no pass-through
    pub fn new() -> Self {
        Self {
            sink_gain: AtomicU32::new(1.0f32.to_bits()),
            speaker_gain_enabled: AtomicBool::new(false),
            passthrough_active: AtomicBool::new(false),
            debug: AtomicBool::new(false),
            mapper: Mutex::new(None),
        }
    }

    /// Set the speaker gain; fails with InvalidArgument outside [0, 1]
    pub fn set_sink_gain(&self, gain: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(MixerError::InvalidArgument(format!(
                "sink gain {} outside [0, 1]",
                gain
            )));
        }
        self.sink_gain.store(gain.to_bits(), Ordering::Relaxed);
        debug!("Sink gain set to {:.3}", gain);
        Ok(())
    }

    pub fn sink_gain(&self) -> f32 {
        f32::from_bits(self.sink_gain.load(Ordering::Relaxed))
    }

    pub fn set_speaker_gain_enabled(&self, enabled: bool) {
        self.speaker_gain_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn speaker_gain_enabled(&self) -> bool {
        self.speaker_gain_enabled.load(Ordering::Relaxed)
    }

    /// Gain the tick applies to the mixed signal
    pub fn effective_gain(&self) -> f32 {
        if self.speaker_gain_enabled() {
            self.sink_gain()
        } else {
            1.0
        }
    }

    pub fn set_passthrough_active(&self, active: bool) {
        let was = self.passthrough_active.swap(active, Ordering::AcqRel);
        if was != active {
            info!("Pass-through ownership of output: {}", active);
        }
    }

    pub fn passthrough_active(&self) -> bool {
        self.passthrough_active.load(Ordering::Acquire)
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn install_mapper(&self, mapper: Box<dyn ChannelMapper>) {
        info!("Installing channel mapper '{}'", mapper.name());
        *self.mapper.lock() = Some(mapper);
    }

    pub fn clear_mapper(&self) {
        *self.mapper.lock() = None;
    }

    pub fn has_mapper(&self) -> bool {
        self.mapper.lock().is_some()
    }

    /// Run the installed mapper, if any
    ///
    /// Returns `false` when no mapper is installed and the default layout applies.
    pub(crate) fn map_channels(
        &self,
        stereo: &[i32],
        frames: usize,
        out: &mut [i32],
        out_channels: usize,
    ) -> bool {
        match self.mapper.lock().as_mut() {
            Some(mapper) => {
                mapper.map(stereo, frames, out, out_channels);
                true
            }
            None => false,
        }
    }
}
