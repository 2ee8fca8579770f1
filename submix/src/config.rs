//! Engine-side mixer configuration

use crate::error::{MixerError, Result};
use submix_common::config::MixerSection;

/// Default frames mixed per tick (8ms @ 48kHz)
pub const DEFAULT_PERIOD_FRAMES: usize = 384;

/// Tuning of one mixer instance
///
/// Built from the `[mixer]` TOML section or constructed directly by a host.
#[derive(Debug, Clone, PartialEq)]
pub struct MixerConfig {
    /// Frames mixed per tick; every input port stages exactly this many frames
    pub period_frames: usize,

    /// Input ring buffer capacity, in periods
    pub inport_buffer_periods: usize,

    /// Pause/resume fade span, in periods of the faded port
    pub fade_periods: usize,

    /// Periods the pacing clock may lag real time before it re-anchors
    pub preroll_periods: u32,

    /// Emit short silence blocks when no input has data
    pub continuous_output: bool,

    /// Frame size of the hwsync stream; 0 disables drift correction
    pub hwsync_frame_size: u32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            period_frames: DEFAULT_PERIOD_FRAMES,
            inport_buffer_periods: 4,
            fade_periods: 1,
            preroll_periods: 4,
            continuous_output: false,
            hwsync_frame_size: 0,
        }
    }
}

impl MixerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.period_frames == 0 {
            return Err(MixerError::InvalidArgument(
                "period_frames must be non-zero".to_string(),
            ));
        }
        if self.inport_buffer_periods == 0 {
            return Err(MixerError::InvalidArgument(
                "inport_buffer_periods must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&MixerSection> for MixerConfig {
    fn from(section: &MixerSection) -> Self {
        Self {
            period_frames: section.period_frames,
            inport_buffer_periods: section.inport_buffer_periods,
            fade_periods: section.fade_periods,
            preroll_periods: section.preroll_periods,
            continuous_output: section.continuous_output,
            hwsync_frame_size: section.hwsync_frame_size,
        }
    }
}
