//! Linear volume ramps for pause/resume of the direct port
//!
//! A fade spans a fixed byte budget of the port's own PCM. Every processed
//! frame is scaled by the current volume, then the volume moves one step
//! toward the target. When the budget is spent the volume snaps to the target
//! so rounding never leaves a residual level behind.

use submix_common::SampleFormat;
use tracing::trace;

/// Direction of a fade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    /// 1.0 → 0.0 (PAUSING)
    Out,

    /// 0.0 → 1.0 (RESUMING)
    In,
}

/// Linear fade over a byte budget
#[derive(Debug, Clone)]
pub struct FadeController {
    current_volume: f64,
    target_volume: f64,
    remaining_bytes: usize,

    /// Volume change per frame: `1 / (budget / frame_stride)`
    per_frame_step: f64,

    /// Bytes per frame of the faded stream
    frame_stride: usize,

    direction: FadeDirection,
}

impl FadeController {
    /// Fade from full volume to silence over `budget_bytes`
    pub fn fade_out(budget_bytes: usize, frame_stride: usize) -> Self {
        Self::new(FadeDirection::Out, budget_bytes, frame_stride)
    }

    /// Fade from silence to full volume over `budget_bytes`
    pub fn fade_in(budget_bytes: usize, frame_stride: usize) -> Self {
        Self::new(FadeDirection::In, budget_bytes, frame_stride)
    }

    fn new(direction: FadeDirection, budget_bytes: usize, frame_stride: usize) -> Self {
        let frame_stride = frame_stride.max(1);
        let frames = budget_bytes / frame_stride;
        let per_frame_step = if frames == 0 { 1.0 } else { 1.0 / frames as f64 };
        let (current_volume, target_volume) = match direction {
            FadeDirection::Out => (1.0, 0.0),
            FadeDirection::In => (0.0, 1.0),
        };

        trace!(
            "Fade {:?}: budget={} bytes, stride={}, step={:.6}",
            direction,
            budget_bytes,
            frame_stride,
            per_frame_step
        );

        let mut fade = Self {
            current_volume,
            target_volume,
            remaining_bytes: budget_bytes,
            per_frame_step,
            frame_stride,
            direction,
        };
        if frames == 0 {
            fade.finish();
        }
        fade
    }

    pub fn direction(&self) -> FadeDirection {
        self.direction
    }

    pub fn current_volume(&self) -> f64 {
        self.current_volume
    }

    pub fn target_volume(&self) -> f64 {
        self.target_volume
    }

    pub fn remaining_bytes(&self) -> usize {
        self.remaining_bytes
    }

    pub fn per_frame_step(&self) -> f64 {
        self.per_frame_step
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_bytes == 0
    }

    /// Scale whole frames of `data` in place and advance the ramp
    ///
    /// Frames processed after the budget is spent are scaled by the target
    /// volume (silenced after a fade-out, untouched after a fade-in).
    pub fn process(&mut self, data: &mut [u8], format: SampleFormat) {
        let sample_bytes = format.bytes_per_sample();
        let stride = self.frame_stride;

        for frame in data.chunks_exact_mut(stride) {
            let gain = self.current_volume;
            if gain != 1.0 {
                for sample in frame.chunks_exact_mut(sample_bytes) {
                    scale_sample(sample, format, gain);
                }
            }
            self.step(stride);
        }
    }

    /// Advance the ramp by one frame of `bytes` bytes
    fn step(&mut self, bytes: usize) {
        if self.is_complete() {
            return;
        }
        self.remaining_bytes = self.remaining_bytes.saturating_sub(bytes);
        if self.remaining_bytes == 0 {
            self.finish();
            return;
        }
        self.current_volume = match self.direction {
            FadeDirection::Out => (self.current_volume - self.per_frame_step).max(0.0),
            FadeDirection::In => (self.current_volume + self.per_frame_step).min(1.0),
        };
    }

    fn finish(&mut self) {
        self.remaining_bytes = 0;
        self.current_volume = self.target_volume;
    }
}

/// Scale one little-endian sample in place, truncating toward zero
fn scale_sample(sample: &mut [u8], format: SampleFormat, gain: f64) {
    match format {
        SampleFormat::S16 => {
            let v = i16::from_le_bytes([sample[0], sample[1]]);
            let scaled = (v as f64 * gain) as i16;
            sample.copy_from_slice(&scaled.to_le_bytes());
        }
        SampleFormat::S24Packed => {
            let v = i32::from_le_bytes([0, sample[0], sample[1], sample[2]]) >> 8;
            let scaled = ((v as f64 * gain) as i32) << 8;
            sample.copy_from_slice(&scaled.to_le_bytes()[1..4]);
        }
        SampleFormat::S32 => {
            let v = i32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
            let scaled = (v as f64 * gain) as i32;
            sample.copy_from_slice(&scaled.to_le_bytes());
        }
        SampleFormat::F32 => {
            let v = f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
            let scaled = (v as f64 * gain) as f32;
            sample.copy_from_slice(&scaled.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16_block(frames: usize, value: i16) -> Vec<u8> {
        (0..frames * 2).flat_map(|_| value.to_le_bytes()).collect()
    }

    fn s16_at(data: &[u8], sample: usize) -> i16 {
        i16::from_le_bytes([data[sample * 2], data[sample * 2 + 1]])
    }

    #[test]
    fn test_fade_out_reaches_zero_over_budget() {
        let budget = 384 * 4;
        let mut fade = FadeController::fade_out(budget, 4);
        assert_eq!(fade.current_volume(), 1.0);

        let mut data = s16_block(192, 10_000);
        fade.process(&mut data, SampleFormat::S16);
        assert!((fade.current_volume() - 0.5).abs() < 1e-9);
        assert_eq!(fade.remaining_bytes(), budget / 2);

        let mut data = s16_block(192, 10_000);
        fade.process(&mut data, SampleFormat::S16);
        assert!(fade.is_complete());
        assert_eq!(fade.current_volume(), 0.0);
    }

    #[test]
    fn test_fade_out_is_linear() {
        let mut fade = FadeController::fade_out(100 * 4, 4);
        let mut data = s16_block(100, 10_000);
        fade.process(&mut data, SampleFormat::S16);

        // frame n is scaled by 1 - n/100 (truncation may cost one LSB)
        assert_eq!(s16_at(&data, 0), 10_000);
        assert_eq!(s16_at(&data, 1), 10_000);
        assert!((s16_at(&data, 50 * 2) - 5_000).abs() <= 1);
        assert!((s16_at(&data, 99 * 2) - 100).abs() <= 1);
    }

    #[test]
    fn test_frames_after_fade_out_are_silent() {
        let mut fade = FadeController::fade_out(4 * 4, 4);
        let mut data = s16_block(8, 1_000);
        fade.process(&mut data, SampleFormat::S16);
        for sample in 8..16 {
            assert_eq!(s16_at(&data, sample), 0);
        }
    }

    #[test]
    fn test_fade_in_starts_silent_and_ends_untouched() {
        let mut fade = FadeController::fade_in(10 * 4, 4);
        let mut data = s16_block(20, 8_000);
        fade.process(&mut data, SampleFormat::S16);

        assert_eq!(s16_at(&data, 0), 0);
        assert!(fade.is_complete());
        assert_eq!(fade.current_volume(), 1.0);
        assert_eq!(s16_at(&data, 15 * 2), 8_000);
    }

    #[test]
    fn test_zero_budget_completes_immediately() {
        let fade = FadeController::fade_out(0, 4);
        assert!(fade.is_complete());
        assert_eq!(fade.current_volume(), 0.0);
    }

    #[test]
    fn test_s32_fade() {
        let mut fade = FadeController::fade_out(2 * 8, 8);
        let mut data: Vec<u8> = (0..4).flat_map(|_| 1_000_000i32.to_le_bytes()).collect();
        fade.process(&mut data, SampleFormat::S32);

        let second = i32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        assert_eq!(second, 500_000);
    }
}
