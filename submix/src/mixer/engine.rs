//! One mixing tick: control → stage → mix → write
//!
//! The same tick body serves every output format; [`TickRunner`] picks the
//! [`SampleFormatPolicy`] once, when the thread starts, so the per-sample
//! routines are monomorphised rather than dispatched per sample.
//!
//! The output port is locked only while the mix is laid out and written.
//! Control messages, staging and hwsync queries run before that, and
//! `on_input_available` after it, so callbacks may call back into the mixer.

use super::device::HostDevice;
use super::dsp::{apply_gain, encode_wide, extend_channels, normalize_into, widen};
use super::hwsync::Correction;
use super::input_port::{InputPort, StageOutcome};
use super::output_port::OutputPort;
use super::policy::{Pcm16Policy, Pcm32Policy, SampleFormatPolicy};
use super::types::{PortSlot, PORT_SLOT_COUNT};
use crate::error::{MixerError, Result};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use submix_common::{PcmConfig, SampleFormat};
use tracing::{debug, trace};

/// Frames of silence written per idle tick in continuous-output mode
pub const CONTINUOUS_SILENCE_FRAMES: usize = 4;

/// Port table as seen by one tick
pub type PortTable = [Option<Arc<InputPort>>; PORT_SLOT_COUNT];

/// Everything a tick touches besides its own buffers
pub struct TickContext<'a> {
    pub ports: &'a PortTable,
    pub output: &'a Mutex<OutputPort>,
    pub device: &'a HostDevice,
    pub hwsync_frame_size: u32,
    pub continuous_output: bool,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Ports whose data was mixed
    pub mixed: Vec<PortSlot>,

    /// Direct port emitted silence for a hwsync insert
    pub inserted: bool,

    /// Direct port blocks discarded for a hwsync skip
    pub skipped: bool,

    /// Ports reset by an applied FLUSH
    pub flushed: Vec<PortSlot>,

    /// Bytes handed to the output port
    pub bytes_written: usize,

    /// No port had data; a keepalive silence block was written
    pub silence_written: bool,
}

impl TickReport {
    /// Whether a period was produced from port data
    ///
    /// A tick whose only work was skipping late blocks produced nothing.
    pub fn had_data(&self) -> bool {
        !self.mixed.is_empty() || self.inserted
    }
}

/// Mixing buffers for one output format
pub struct MixEngine<P: SampleFormatPolicy> {
    period_frames: usize,
    out_channels: usize,

    /// Stereo mix of one period in the output sample type
    mix: Vec<P::Sample>,

    /// Channel-mapper scratch: stereo in, N channels out
    wide_in: Vec<i32>,
    wide_out: Vec<i32>,

    _policy: PhantomData<P>,
}

impl<P: SampleFormatPolicy> std::fmt::Debug for MixEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixEngine")
            .field("format", &P::FORMAT)
            .field("period_frames", &self.period_frames)
            .field("out_channels", &self.out_channels)
            .finish()
    }
}

fn alloc<T: Copy + Default>(len: usize, what: &str) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|e| MixerError::ResourceExhausted(format!("{} ({} samples): {}", what, len, e)))?;
    v.resize(len, T::default());
    Ok(v)
}

/// Hwsync correction for a freshly staged block
///
/// Late blocks are discarded and the next one staged in the same tick, for as
/// long as the skip budget lasts. `None` when the ring ran dry while skipping.
fn correct(port: &InputPort, hwsync_frame_size: u32, report: &mut TickReport) -> Option<Correction> {
    if port.slot() != PortSlot::Direct {
        return Some(Correction::Pass);
    }
    loop {
        match port.hwsync_correction(hwsync_frame_size) {
            Correction::Skip => {
                port.release_staged();
                report.skipped = true;
                if port.stage() != StageOutcome::Ready {
                    return None;
                }
            }
            correction => return Some(correction),
        }
    }
}

impl<P: SampleFormatPolicy> MixEngine<P> {
    pub fn new(period_frames: usize, out_channels: usize) -> Result<Self> {
        Ok(Self {
            period_frames,
            out_channels,
            mix: alloc(period_frames * 2, "mix buffer")?,
            wide_in: alloc(period_frames * 2, "mapper input")?,
            wide_out: alloc(period_frames * out_channels, "mapper output")?,
            _policy: PhantomData,
        })
    }

    pub fn tick(&mut self, ctx: &TickContext<'_>) -> Result<TickReport> {
        let mut report = TickReport::default();
        let ports: Vec<&Arc<InputPort>> = ctx.ports.iter().flatten().collect();

        // 1. control messages, one per port
        for port in &ports {
            port.apply_pending_message();
        }

        // 2. stage one period from every playing port, hwsync first for the direct port
        let mut plan = Vec::with_capacity(ports.len());
        for port in &ports {
            match port.stage() {
                StageOutcome::Ready => {
                    if let Some(correction) = correct(port, ctx.hwsync_frame_size, &mut report) {
                        plan.push((*port, correction));
                    }
                }
                StageOutcome::Flushed => report.flushed.push(port.slot()),
                StageOutcome::NotReady => {}
            }
        }

        // 3. mix and write, or idle
        let result = if plan.is_empty() {
            Self::write_idle(ctx, &mut report)
        } else {
            self.mix_and_write(ctx, &plan, &mut report)
        };

        // 4. producers may refill, output lock released
        for port in &ports {
            port.notify_input_available();
        }
        result.map(|()| report)
    }

    fn write_idle(ctx: &TickContext<'_>, report: &mut TickReport) -> Result<()> {
        if ctx.continuous_output && !ctx.device.passthrough_active() {
            report.bytes_written = ctx.output.lock().write_silence(CONTINUOUS_SILENCE_FRAMES)?;
            report.silence_written = true;
        }
        trace!("tick: no input data (skipped={})", report.skipped);
        Ok(())
    }

    fn mix_and_write(
        &mut self,
        ctx: &TickContext<'_>,
        plan: &[(&Arc<InputPort>, Correction)],
        report: &mut TickReport,
    ) -> Result<()> {
        let mut first = true;
        for (port, correction) in plan {
            if *correction == Correction::Insert {
                // block stays staged for a later tick
                report.inserted = true;
                continue;
            }
            let accumulate = !first;
            port.with_staged(|bytes, volume| {
                normalize_into::<P>(bytes, port.config(), volume, &mut self.mix, accumulate)
            });
            port.release_staged();
            report.mixed.push(port.slot());
            first = false;
        }
        if first {
            self.mix.fill(P::Sample::default());
        }

        // sink gain, then channel extension
        apply_gain::<P>(&mut self.mix, ctx.device.effective_gain());

        let mut output = ctx.output.lock();
        let out_bytes = self.extend_into(&mut output, ctx.device)?;

        // hand off unless an external pass-through path owns the sink
        if ctx.device.passthrough_active() {
            output.set_available(0)?;
        } else {
            report.bytes_written = output.flush_pending()?;
            if let Some(ts) = output.hardware_timestamp() {
                let buffer_frames = output.buffer_frames();
                for port in ctx.ports.iter().flatten() {
                    port.update_presentation(buffer_frames, &ts);
                }
            }
        }
        drop(output);

        if ctx.device.debug_enabled() {
            debug!(
                "tick: mixed={:?} inserted={} skipped={} wrote {}/{} bytes",
                report.mixed, report.inserted, report.skipped, report.bytes_written, out_bytes
            );
        } else {
            trace!("tick: mixed={:?} wrote {} bytes", report.mixed, report.bytes_written);
        }
        Ok(())
    }

    /// Lay the stereo mix out in the output format; returns valid bytes
    fn extend_into(&mut self, output: &mut OutputPort, device: &HostDevice) -> Result<usize> {
        let frames = self.period_frames;
        let out_bytes = frames * self.out_channels * P::FORMAT.bytes_per_sample();
        let buffer = output.buffer_mut();

        let mapped = device.has_mapper() && {
            widen::<P>(&self.mix, &mut self.wide_in);
            device.map_channels(&self.wide_in, frames, &mut self.wide_out, self.out_channels)
        };
        if mapped {
            encode_wide::<P>(&self.wide_out, &mut buffer[..out_bytes]);
        } else {
            extend_channels::<P>(&self.mix, frames, self.out_channels, &mut buffer[..out_bytes]);
        }

        output.set_available(out_bytes)?;
        Ok(out_bytes)
    }
}

/// Tick body selected for the output sample format
#[derive(Debug)]
pub enum TickRunner {
    S16(MixEngine<Pcm16Policy>),
    S32(MixEngine<Pcm32Policy>),
}

impl TickRunner {
    /// Pick the mixing routine for `output`
    ///
    /// # Errors
    /// `UnsupportedConfiguration` when no routine exists for the output format.
    pub fn for_output(output: &PcmConfig, period_frames: usize) -> Result<Self> {
        let channels = output.channels as usize;
        match output.format {
            SampleFormat::S16 => Ok(TickRunner::S16(MixEngine::new(period_frames, channels)?)),
            SampleFormat::S32 => Ok(TickRunner::S32(MixEngine::new(period_frames, channels)?)),
            other => Err(MixerError::UnsupportedConfiguration(format!(
                "no mixing routine for {} output",
                other
            ))),
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            TickRunner::S16(_) => Pcm16Policy::FORMAT,
            TickRunner::S32(_) => Pcm32Policy::FORMAT,
        }
    }

    pub fn tick(&mut self, ctx: &TickContext<'_>) -> Result<TickReport> {
        match self {
            TickRunner::S16(engine) => engine.tick(ctx),
            TickRunner::S32(engine) => engine.tick(ctx),
        }
    }
}
