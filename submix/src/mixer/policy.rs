//! Output sample format policies
//!
//! One mixing loop serves every supported output format; the policy supplies
//! the sample type, conversion from port formats, and the clipping rule.

use std::fmt::Debug;
use submix_common::SampleFormat;

/// Sample arithmetic for one output format
pub trait SampleFormatPolicy: Send + 'static {
    /// In-memory sample type of the mix buffer
    type Sample: Copy + Default + PartialEq + Debug + Send;

    /// Output format this policy mixes for
    const FORMAT: SampleFormat;

    fn from_s16(v: i16) -> Self::Sample;

    fn from_s32(v: i32) -> Self::Sample;

    /// Per-sample addition clipped to the sample range
    fn saturating_add(a: Self::Sample, b: Self::Sample) -> Self::Sample;

    /// Multiply by `gain`, truncating toward zero
    fn scale(v: Self::Sample, gain: f64) -> Self::Sample;

    /// Widen to the 32-bit full-scale domain used by channel mappers
    fn to_wide(v: Self::Sample) -> i32;

    fn from_wide(v: i32) -> Self::Sample;

    fn write_le(v: Self::Sample, out: &mut [u8]);
}

/// Signed 16-bit output
#[derive(Debug, Clone, Copy, Default)]
pub struct Pcm16Policy;

impl SampleFormatPolicy for Pcm16Policy {
    type Sample = i16;
    const FORMAT: SampleFormat = SampleFormat::S16;

    fn from_s16(v: i16) -> i16 {
        v
    }

    fn from_s32(v: i32) -> i16 {
        (v >> 16) as i16
    }

    fn saturating_add(a: i16, b: i16) -> i16 {
        a.saturating_add(b)
    }

    fn scale(v: i16, gain: f64) -> i16 {
        (v as f64 * gain) as i16
    }

    fn to_wide(v: i16) -> i32 {
        (v as i32) << 16
    }

    fn from_wide(v: i32) -> i16 {
        (v >> 16) as i16
    }

    fn write_le(v: i16, out: &mut [u8]) {
        out[..2].copy_from_slice(&v.to_le_bytes());
    }
}

/// Signed 32-bit output
#[derive(Debug, Clone, Copy, Default)]
pub struct Pcm32Policy;

impl SampleFormatPolicy for Pcm32Policy {
    type Sample = i32;
    const FORMAT: SampleFormat = SampleFormat::S32;

    fn from_s16(v: i16) -> i32 {
        (v as i32) << 16
    }

    fn from_s32(v: i32) -> i32 {
        v
    }

    fn saturating_add(a: i32, b: i32) -> i32 {
        a.saturating_add(b)
    }

    fn scale(v: i32, gain: f64) -> i32 {
        (v as f64 * gain) as i32
    }

    fn to_wide(v: i32) -> i32 {
        v
    }

    fn from_wide(v: i32) -> i32 {
        v
    }

    fn write_le(v: i32, out: &mut [u8]) {
        out[..4].copy_from_slice(&v.to_le_bytes());
    }
}
