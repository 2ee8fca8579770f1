//! Shared test infrastructure for submix integration tests
//!
//! - `CaptureSink`: a sink that records every byte the mixer writes
//! - `RecordingObserver`: collects port notifications
//! - `ScriptedDrift`: hwsync metadata provider replaying canned drift replies
//! - PCM builders for 16-bit test signals

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use submix::audio::{HardwareTimestamp, PcmSink};
use submix::error::DriftQueryError;
use submix::mixer::{
    AudioMixer, HostDevice, HwsyncHeader, HwsyncMetadataProvider, PortObserver, PortSlot,
    PortState,
};
use submix::{MixerConfig, PcmConfig, Result};

pub const RATE: u32 = 48_000;

// ---- sink ----

#[derive(Debug, Default)]
pub struct CaptureState {
    pub data: Vec<u8>,
    pub started: bool,
    pub starts: usize,
    pub standbys: usize,
    pub writes: usize,
}

/// Handle to what a `CaptureSink` recorded, usable after the sink moved into the mixer
#[derive(Debug, Clone, Default)]
pub struct Capture(Arc<Mutex<CaptureState>>);

impl Capture {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().data.clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().data.len()
    }

    pub fn samples_s16(&self) -> Vec<i16> {
        s16_samples(&self.0.lock().data)
    }

    pub fn clear(&self) {
        self.0.lock().data.clear();
    }

    pub fn starts(&self) -> usize {
        self.0.lock().starts
    }

    pub fn standbys(&self) -> usize {
        self.0.lock().standbys
    }

    pub fn writes(&self) -> usize {
        self.0.lock().writes
    }

    pub fn is_started(&self) -> bool {
        self.0.lock().started
    }
}

/// Records the mixed stream; its counter always reports a fully drained buffer
pub struct CaptureSink {
    capture: Capture,
    buffer_frames: u64,
}

impl CaptureSink {
    pub fn new(buffer_frames: u64) -> (Self, Capture) {
        let capture = Capture::default();
        (
            Self {
                capture: capture.clone(),
                buffer_frames,
            },
            capture,
        )
    }
}

impl PcmSink for CaptureSink {
    fn start(&mut self) -> Result<()> {
        let mut state = self.capture.0.lock();
        state.started = true;
        state.starts += 1;
        Ok(())
    }

    fn standby(&mut self) -> Result<()> {
        let mut state = self.capture.0.lock();
        if state.started {
            state.started = false;
            state.standbys += 1;
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.capture.0.lock();
        state.data.extend_from_slice(data);
        state.writes += 1;
        Ok(data.len())
    }

    fn buffer_frames(&self) -> u64 {
        self.buffer_frames
    }

    fn hardware_timestamp(&self) -> Option<HardwareTimestamp> {
        let state = self.capture.0.lock();
        if !state.started || state.data.is_empty() {
            return None;
        }
        Some(HardwareTimestamp {
            avail_frames: self.buffer_frames,
            at: Instant::now(),
        })
    }

    fn name(&self) -> &str {
        "capture"
    }
}

// ---- mixer builders ----

pub struct TestMixer {
    pub mixer: AudioMixer,
    pub capture: Capture,
    pub device: Arc<HostDevice>,
}

/// Stereo 16-bit 48 kHz mixer over a capture sink
pub fn test_mixer(period_frames: usize) -> TestMixer {
    test_mixer_with(
        MixerConfig {
            period_frames,
            ..Default::default()
        },
        PcmConfig::stereo_s16(RATE),
    )
}

pub fn test_mixer_with(config: MixerConfig, output: PcmConfig) -> TestMixer {
    let (sink, capture) = CaptureSink::new(1024);
    let device = Arc::new(HostDevice::new());
    let mixer = AudioMixer::new(config, output, Box::new(sink), Arc::clone(&device))
        .expect("mixer should build");
    TestMixer {
        mixer,
        capture,
        device,
    }
}

// ---- observers ----

#[derive(Debug, Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<(PortSlot, PortState)>>,
    available: AtomicUsize,
    exits: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn states(&self) -> Vec<PortState> {
        self.states.lock().iter().map(|(_, s)| *s).collect()
    }

    pub fn available_count(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    pub fn exit_count(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }
}

impl PortObserver for RecordingObserver {
    fn on_state_changed(&self, slot: PortSlot, state: PortState) {
        self.states.lock().push((slot, state));
    }

    fn on_input_available(&self, _slot: PortSlot) {
        self.available.fetch_add(1, Ordering::SeqCst);
    }

    fn on_mixer_exit(&self, _slot: PortSlot) {
        self.exits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Replays queued drift replies; answers `Again` once the script runs out
#[derive(Debug, Default)]
pub struct ScriptedDrift {
    replies: Mutex<VecDeque<std::result::Result<i32, DriftQueryError>>>,
    offsets: Mutex<Vec<u64>>,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
}

impl ScriptedDrift {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_drift(&self, drift_ms: i32) {
        self.replies.lock().push_back(Ok(drift_ms));
    }

    pub fn push_error(&self, error: DriftQueryError) {
        self.replies.lock().push_back(Err(error));
    }

    /// Offsets the port asked about, in order
    pub fn offsets(&self) -> Vec<u64> {
        self.offsets.lock().clone()
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl HwsyncMetadataProvider for ScriptedDrift {
    fn query_drift(
        &self,
        aligned_offset: u64,
    ) -> std::result::Result<(HwsyncHeader, i32), DriftQueryError> {
        self.offsets.lock().push(aligned_offset);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or(Err(DriftQueryError::Again));
        reply.map(|drift_ms| {
            (
                HwsyncHeader {
                    pts_ns: aligned_offset * 1_000,
                    payload_size: 0,
                },
                drift_ms,
            )
        })
    }

    fn on_pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn on_resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

// ---- PCM builders ----

pub fn s16_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn s16_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Interleaved stereo frames holding the same value on both channels
pub fn constant_stereo(frames: usize, value: i16) -> Vec<u8> {
    s16_bytes(&vec![value; frames * 2])
}

/// Stereo frames with a distinct value per sample: L = 2i + start, R = 2i + start + 1
pub fn ramp_stereo(frames: usize, start: i16) -> Vec<u8> {
    let samples: Vec<i16> = (0..frames * 2)
        .map(|i| start.wrapping_add(i as i16))
        .collect();
    s16_bytes(&samples)
}

/// Deterministic stereo waveform (sawtooth on L, inverted on R)
pub fn waveform_stereo(frames: usize, offset: usize) -> Vec<u8> {
    let samples: Vec<i16> = (0..frames)
        .flat_map(|i| {
            let v = (((i + offset) % 200) as i32 * 300 - 30_000) as i16;
            [v, v.saturating_neg()]
        })
        .collect();
    s16_bytes(&samples)
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
