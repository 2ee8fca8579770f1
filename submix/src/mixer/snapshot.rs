//! Point-in-time dump of the mixer for diagnostics

use super::types::{MixerState, PortSlot, PortState, RunState};
use serde::Serialize;
use std::fmt;
use submix_common::SampleFormat;

/// One input port
#[derive(Debug, Clone, Serialize)]
pub struct PortSnapshot {
    pub slot: PortSlot,
    pub state: PortState,
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub period_frames: usize,
    pub staged_bytes: usize,
    pub is_hwsync: bool,
    pub ring_capacity: usize,
    pub ring_occupied: usize,
    pub volume: f32,
    pub padding_frames: u64,
    pub bytes_to_insert: usize,
    pub bytes_to_skip: usize,
    pub pending_messages: usize,
    pub mix_consumed_frames: u64,
    pub initial_frames: u64,
    pub presentation_frames: u64,
    pub flush_count: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSnapshot {
    pub sink: String,
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub period_frames: usize,
    pub capacity: usize,
    pub started: bool,
    pub dummy: bool,
    pub frames_written: u64,
}

/// Whole mixer
#[derive(Debug, Clone, Serialize)]
pub struct MixerSnapshot {
    pub state: MixerState,
    pub run_state: RunState,
    pub continuous_output: bool,
    pub hwsync_frame_size: u32,
    pub ticks: u64,
    pub output: OutputSnapshot,
    pub ports: Vec<PortSnapshot>,
}

impl fmt::Display for MixerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "mixer: state={:?} run={:?} ticks={} continuous={} hwsync_frame_size={}",
            self.state, self.run_state, self.ticks, self.continuous_output, self.hwsync_frame_size
        )?;
        let o = &self.output;
        writeln!(
            f,
            "  output [{}]: {} {}ch {}Hz period={} capacity={}B started={} dummy={} written={} frames",
            o.sink,
            o.format,
            o.channels,
            o.sample_rate,
            o.period_frames,
            o.capacity,
            o.started,
            o.dummy,
            o.frames_written
        )?;
        if self.ports.is_empty() {
            writeln!(f, "  no input ports")?;
        }
        for p in &self.ports {
            writeln!(
                f,
                "  {} port: {} {} {}ch {}Hz period={} staged={}B hwsync={} ring={}/{}B vol={:.3}",
                p.slot,
                p.state,
                p.format,
                p.channels,
                p.sample_rate,
                p.period_frames,
                p.staged_bytes,
                p.is_hwsync,
                p.ring_occupied,
                p.ring_capacity,
                p.volume
            )?;
            writeln!(
                f,
                "    consumed={} initial={} presented={} padding={} insert={}B skip={}B msgs={} flushes={}",
                p.mix_consumed_frames,
                p.initial_frames,
                p.presentation_frames,
                p.padding_frames,
                p.bytes_to_insert,
                p.bytes_to_skip,
                p.pending_messages,
                p.flush_count
            )?;
        }
        Ok(())
    }
}
