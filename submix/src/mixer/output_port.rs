//! Output port: the mixed-result buffer in front of one physical sink
//!
//! The mixer writes one period of mixed PCM into [`OutputPort::buffer_mut`],
//! marks the valid length with [`OutputPort::set_available`] and hands it on
//! with [`OutputPort::flush_pending`]. The sink is started lazily on the first
//! write after construction or standby.

use crate::audio::{HardwareTimestamp, PcmSink};
use crate::error::{MixerError, Result};
use std::time::Instant;
use submix_common::PcmConfig;
use tracing::{debug, info, warn};

pub struct OutputPort {
    config: PcmConfig,
    period_frames: usize,
    sink: Box<dyn PcmSink>,

    /// Mixed data, exactly one period long
    data: Vec<u8>,

    /// Valid bytes in `data`; never exceeds `data.len()`
    bytes_avail: usize,

    /// Discard writes while reporting them as fully written
    dummy: bool,

    started: bool,
    frames_written: u64,
    short_writes: u64,
}

impl std::fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPort")
            .field("config", &self.config)
            .field("period_frames", &self.period_frames)
            .field("sink", &self.sink.name())
            .field("bytes_avail", &self.bytes_avail)
            .field("dummy", &self.dummy)
            .field("started", &self.started)
            .field("frames_written", &self.frames_written)
            .finish()
    }
}

impl OutputPort {
    /// Create the output port with a one-period mix buffer
    ///
    /// # Errors
    /// - `InvalidArgument` for a zero period or an empty frame layout
    /// - `ResourceExhausted` if the buffer cannot be allocated
    pub fn new(config: PcmConfig, period_frames: usize, sink: Box<dyn PcmSink>) -> Result<Self> {
        if period_frames == 0 || config.frame_size() == 0 {
            return Err(MixerError::InvalidArgument(format!(
                "output port needs a non-empty period (period_frames={}, {})",
                period_frames, config
            )));
        }

        let capacity = config.bytes_for_frames(period_frames);
        let mut data = Vec::new();
        data.try_reserve_exact(capacity).map_err(|e| {
            MixerError::ResourceExhausted(format!("output buffer of {} bytes: {}", capacity, e))
        })?;
        data.resize(capacity, 0);

        debug!(
            "Creating output port: {} period={} frames, sink={}",
            config,
            period_frames,
            sink.name()
        );

        Ok(Self {
            config,
            period_frames,
            sink,
            data,
            bytes_avail: 0,
            dummy: false,
            started: false,
            frames_written: 0,
            short_writes: 0,
        })
    }

    pub fn config(&self) -> &PcmConfig {
        &self.config
    }

    pub fn period_frames(&self) -> usize {
        self.period_frames
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub fn start(&mut self) -> Result<()> {
        if !self.started {
            self.sink.start()?;
            self.started = true;
            info!("Output port started on {} sink", self.sink.name());
        }
        Ok(())
    }

    /// Stop the sink; the next write starts it again
    pub fn standby(&mut self) -> Result<()> {
        if self.started {
            self.sink.standby()?;
            self.started = false;
            info!("Output port in standby");
        }
        self.bytes_avail = 0;
        Ok(())
    }

    /// Write `data` to the sink, starting it if needed
    ///
    /// Returns the bytes the sink accepted. In dummy mode the data is dropped
    /// and reported as fully written.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.dummy {
            self.frames_written += self.config.frames_in(data.len()) as u64;
            return Ok(data.len());
        }

        self.start()?;
        let written = self.sink.write(data)?;
        if written < data.len() {
            self.short_writes += 1;
            warn!(
                "Short sink write: {}/{} bytes ({} so far)",
                written,
                data.len(),
                self.short_writes
            );
        }
        self.frames_written += self.config.frames_in(written) as u64;
        Ok(written)
    }

    /// Write the valid part of the mix buffer and mark it consumed
    pub fn flush_pending(&mut self) -> Result<usize> {
        let len = self.bytes_avail;
        if len == 0 {
            return Ok(0);
        }
        let data = std::mem::take(&mut self.data);
        let result = self.write(&data[..len]);
        self.data = data;
        self.bytes_avail = 0;
        result
    }

    /// Write `frames` frames of silence (continuous-output keepalive)
    pub fn write_silence(&mut self, frames: usize) -> Result<usize> {
        let len = self.config.bytes_for_frames(frames).min(self.data.len());
        self.data[..len].fill(0);
        self.set_available(len)?;
        self.flush_pending()
    }

    /// Mark `len` bytes of the mix buffer as valid
    pub fn set_available(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(MixerError::InvalidArgument(format!(
                "available length {} exceeds output capacity {}",
                len,
                self.data.len()
            )));
        }
        self.bytes_avail = len;
        Ok(())
    }

    pub fn available(&self) -> usize {
        self.bytes_avail
    }

    /// The whole one-period mix buffer
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Device-side latency: the sink buffer plus any extra device delay
    pub fn latency_frames(&self) -> u32 {
        (self.sink.buffer_frames() + self.sink.latency_frames() as u64).min(u32::MAX as u64) as u32
    }

    pub fn buffer_frames(&self) -> u64 {
        self.sink.buffer_frames()
    }

    pub fn set_dummy(&mut self, enabled: bool) {
        if self.dummy != enabled {
            info!("Output port dummy mode: {}", enabled);
        }
        self.dummy = enabled;
    }

    pub fn is_dummy(&self) -> bool {
        self.dummy
    }

    /// Latest sink counter
    ///
    /// A dummy port drains instantly: its counter always shows the sink
    /// buffer empty, so everything written counts as presented.
    pub fn hardware_timestamp(&self) -> Option<HardwareTimestamp> {
        if self.dummy {
            return (self.frames_written > 0).then(|| HardwareTimestamp {
                avail_frames: self.sink.buffer_frames(),
                at: Instant::now(),
            });
        }
        if !self.started {
            return None;
        }
        self.sink.hardware_timestamp()
    }
}
