//! Physical sink abstraction
//!
//! The output port owns exactly one [`PcmSink`]. Sinks are opened lazily by
//! the output port on the first write and put into standby when the mixer
//! sleeps or drains.

use crate::error::Result;
use std::time::Instant;
use submix_common::PcmConfig;
use tracing::{debug, info};

/// Snapshot of the sink's hardware counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareTimestamp {
    /// Free space in the sink buffer, in frames
    pub avail_frames: u64,

    /// When the counter was sampled
    pub at: Instant,
}

/// Destination of the mixed stream
pub trait PcmSink: Send {
    /// Open / un-pause the device
    fn start(&mut self) -> Result<()>;

    /// Close or pause the device; a later `start` must reopen it
    fn standby(&mut self) -> Result<()>;

    /// Queue interleaved PCM in the output format; returns bytes accepted
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Device latency in frames, beyond the buffer itself
    fn latency_frames(&self) -> u32 {
        0
    }

    /// Size of the device buffer, in frames
    fn buffer_frames(&self) -> u64;

    /// Latest hardware counter, `None` until the device has consumed anything
    fn hardware_timestamp(&self) -> Option<HardwareTimestamp>;

    fn name(&self) -> &str;
}

/// Sink that discards audio while simulating a device draining in real time
///
/// Its hardware counter behaves like a device buffer of `buffer_frames`
/// frames drained at the configured rate, so presentation math can be
/// exercised without hardware.
#[derive(Debug)]
pub struct NullSink {
    config: PcmConfig,
    buffer_frames: u64,
    latency_frames: u32,
    started_at: Option<Instant>,
    frames_written: u64,
}

impl NullSink {
    pub fn new(config: PcmConfig, buffer_frames: u64, latency_frames: u32) -> Self {
        debug!(
            "Creating null sink: {} buffer_frames={} latency_frames={}",
            config, buffer_frames, latency_frames
        );
        Self {
            config,
            buffer_frames,
            latency_frames,
            started_at: None,
            frames_written: 0,
        }
    }

    /// Frames still queued in the simulated device buffer at `now`
    fn queued_frames(&self, now: Instant) -> u64 {
        let Some(started) = self.started_at else {
            return 0;
        };
        let elapsed = now.duration_since(started);
        let drained = elapsed.as_nanos() as u64 * self.config.sample_rate as u64 / 1_000_000_000;
        self.frames_written
            .saturating_sub(drained)
            .min(self.buffer_frames)
    }
}

impl PcmSink for NullSink {
    fn start(&mut self) -> Result<()> {
        if self.started_at.is_none() {
            info!("Null sink started ({})", self.config);
            self.started_at = Some(Instant::now());
            self.frames_written = 0;
        }
        Ok(())
    }

    fn standby(&mut self) -> Result<()> {
        if self.started_at.take().is_some() {
            info!("Null sink in standby");
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.frames_written += self.config.frames_in(data.len()) as u64;
        Ok(data.len())
    }

    fn latency_frames(&self) -> u32 {
        self.latency_frames
    }

    fn buffer_frames(&self) -> u64 {
        self.buffer_frames
    }

    fn hardware_timestamp(&self) -> Option<HardwareTimestamp> {
        if self.started_at.is_none() || self.frames_written == 0 {
            return None;
        }
        let now = Instant::now();
        Some(HardwareTimestamp {
            avail_frames: self.buffer_frames - self.queued_frames(now),
            at: now,
        })
    }

    fn name(&self) -> &str {
        "null"
    }
}
