//! Sine tone source used by `submix-run`

use std::f64::consts::PI;
use submix_common::{PcmConfig, SampleFormat};

/// Phase-continuous sine generator producing interleaved PCM blocks
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    config: PcmConfig,
    frequency_hz: f64,
    amplitude: f64,
    frame_index: u64,
}

impl ToneGenerator {
    /// `amplitude` is clamped to [0, 1] of full scale
    pub fn new(config: PcmConfig, frequency_hz: f32, amplitude: f32) -> Self {
        Self {
            config,
            frequency_hz: frequency_hz as f64,
            amplitude: amplitude.clamp(0.0, 1.0) as f64,
            frame_index: 0,
        }
    }

    pub fn config(&self) -> &PcmConfig {
        &self.config
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_index
    }

    /// Produce the next `frames` frames (same value on every channel)
    pub fn next_block(&mut self, frames: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.config.bytes_for_frames(frames));
        let rate = self.config.sample_rate.max(1) as f64;

        for _ in 0..frames {
            let t = self.frame_index as f64 / rate;
            let value = (2.0 * PI * self.frequency_hz * t).sin() * self.amplitude;
            for _ in 0..self.config.channels {
                match self.config.format {
                    SampleFormat::S32 => {
                        out.extend_from_slice(&((value * i32::MAX as f64) as i32).to_le_bytes())
                    }
                    _ => out.extend_from_slice(&((value * i16::MAX as f64) as i16).to_le_bytes()),
                }
            }
            self.frame_index += 1;
        }
        out
    }
}
