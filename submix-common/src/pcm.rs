//! PCM stream description shared by ports, sinks and configuration
//!
//! All PCM handled by the mixer is interleaved, little-endian and signed.
//! A *frame* is one sample for every channel, so 16-bit stereo is 4 bytes/frame.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sample encoding of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit
    S16,

    /// Signed 24-bit packed in 3 bytes
    #[serde(rename = "s24_packed")]
    S24Packed,

    /// Signed 32-bit
    S32,

    /// 32-bit float
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::S24Packed => 3,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SampleFormat::S16 => "s16",
            SampleFormat::S24Packed => "s24_packed",
            SampleFormat::S32 => "s32",
            SampleFormat::F32 => "f32",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "s16" | "pcm16" | "16" => Ok(SampleFormat::S16),
            "s24_packed" | "s24" | "24" => Ok(SampleFormat::S24Packed),
            "s32" | "pcm32" | "32" => Ok(SampleFormat::S32),
            "f32" | "float" => Ok(SampleFormat::F32),
            other => Err(Error::InvalidInput(format!("unknown sample format '{}'", other))),
        }
    }
}

/// PCM configuration of one stream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmConfig {
    /// Frames per second
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,

    /// Sample encoding
    pub format: SampleFormat,
}

impl PcmConfig {
    pub const fn new(sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            format,
        }
    }

    /// 48 kHz, 16-bit stereo: the format system sounds arrive in
    pub const fn stereo_s16(sample_rate: u32) -> Self {
        Self::new(sample_rate, 2, SampleFormat::S16)
    }

    /// Bytes per frame (all channels)
    pub const fn frame_size(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Byte length of `frames` frames
    pub const fn bytes_for_frames(&self, frames: usize) -> usize {
        frames * self.frame_size()
    }

    /// Whole frames contained in `bytes` (trailing partial frame ignored)
    pub fn frames_in(&self, bytes: usize) -> usize {
        match self.frame_size() {
            0 => 0,
            size => bytes / size,
        }
    }

    /// Duration of `frames` frames in nanoseconds
    pub fn frames_to_nanos(&self, frames: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        frames * 1_000_000_000 / self.sample_rate as u64
    }
}

impl Default for PcmConfig {
    fn default() -> Self {
        Self::stereo_s16(48_000)
    }
}

impl fmt::Display for PcmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch/{}", self.sample_rate, self.channels, self.format)
    }
}
