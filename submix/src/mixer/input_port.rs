//! Input port: per-stream ring buffer, lifecycle state and DSP state
//!
//! Each port is single-producer / single-consumer: the stream's writer thread
//! pushes PCM through [`InputPort::write`], the mixing thread stages one
//! period at a time. Producer and consumer halves of the ring live behind
//! their own locks, so the bulk data path never contends with metadata.
//!
//! ## Locking
//!
//! `consumer` → `meta` and `producer` → `meta` are the only nesting orders.
//! Observer and metadata-provider callbacks always run with no lock held.
//!
//! ## Frame accounting
//!
//! ```text
//! write ──> ring ──stage──> staged block ──release──> mix_consumed_frames
//!                                                     (padding frames excluded)
//! presentation = initial + max(0, consumed - sink_buffer + sink_avail)
//! ```

use super::fade::{FadeController, FadeDirection};
use super::hwsync::{aligned_offset, Correction, HwsyncBudgets};
use super::observer::{HwsyncMetadataProvider, PortObserver};
use super::snapshot::PortSnapshot;
use super::types::{OutputFlags, PortMessage, PortSlot, PortState, Transition};
use crate::audio::HardwareTimestamp;
use crate::config::MixerConfig;
use crate::error::{DriftQueryError, MixerError, Result};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use submix_common::{PcmConfig, SampleFormat};
use tracing::{debug, info, trace, warn};

/// Pending control messages a port can hold
pub const MESSAGE_QUEUE_CAPACITY: usize = 8;

/// Creation-time options of an input port
#[derive(Clone)]
pub struct PortOptions {
    /// Initial volume in [0, 1]
    pub volume: f32,

    /// Frames the stream had already presented before this port existed
    pub initial_frames: u64,

    pub observer: Option<Arc<dyn PortObserver>>,

    /// Drift source; only valid on the direct slot, marks the port hwsync
    pub metadata_provider: Option<Arc<dyn HwsyncMetadataProvider>>,
}

impl Default for PortOptions {
    fn default() -> Self {
        Self {
            volume: 1.0,
            initial_frames: 0,
            observer: None,
            metadata_provider: None,
        }
    }
}

impl std::fmt::Debug for PortOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortOptions")
            .field("volume", &self.volume)
            .field("initial_frames", &self.initial_frames)
            .field("observer", &self.observer.is_some())
            .field("metadata_provider", &self.metadata_provider.is_some())
            .finish()
    }
}

impl PortOptions {
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_initial_frames(mut self, frames: u64) -> Self {
        self.initial_frames = frames;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PortObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_metadata_provider(mut self, provider: Arc<dyn HwsyncMetadataProvider>) -> Self {
        self.metadata_provider = Some(provider);
        self
    }
}

/// Result of trying to stage one period for mixing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// A full period is staged and ready to mix
    Ready,

    /// Not enough data or the port is not playing; skip it this tick
    NotReady,

    /// The port was flushed during staging
    Flushed,
}

/// Consumer half plus the staging buffer, owned by the mixing thread
struct ConsumerSide {
    cons: HeapCons<u8>,

    /// One period of PCM pulled from the ring
    staged: Vec<u8>,

    /// Valid bytes in `staged`; a full period means `data_valid`
    staged_len: usize,

    /// The staged block already went through a pause/resume fade
    faded: bool,
}

/// Metadata shared between producer, mixer and control calls
#[derive(Debug)]
struct PortMeta {
    state: PortState,
    volume: f32,
    padding_frames: u64,
    budgets: HwsyncBudgets,
    messages: VecDeque<PortMessage>,
    mix_consumed_frames: u64,
    consumed_bytes: u64,
    initial_frames: u64,
    presentation_frames: u64,

    /// Time of the last hardware timestamp used for `presentation_frames`
    timestamp: Option<Instant>,

    /// Last release counted real (non-padding) frames
    pts_valid: bool,

    fade: Option<FadeController>,
    flush_count: u64,
}

/// Observer callbacks collected under a lock and delivered after it is released
#[derive(Debug, Default)]
struct Deferred {
    state: Option<PortState>,
    pause_hook: bool,
    resume_hook: bool,
}

pub struct InputPort {
    slot: PortSlot,
    config: PcmConfig,
    flags: OutputFlags,
    period_frames: usize,
    period_bytes: usize,

    /// Ring capacity in bytes
    capacity: usize,

    /// Fade length in bytes of this port's PCM
    fade_bytes: usize,

    producer: Mutex<HeapProd<u8>>,
    consumer: Mutex<ConsumerSide>,
    meta: Mutex<PortMeta>,

    observer: Option<Arc<dyn PortObserver>>,
    metadata_provider: Option<Arc<dyn HwsyncMetadataProvider>>,

    /// Total bytes accepted by `write` (statistics)
    bytes_written: AtomicU64,

    /// Total bytes pulled from the ring (statistics)
    bytes_read: AtomicU64,
}

impl std::fmt::Debug for InputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputPort")
            .field("slot", &self.slot)
            .field("config", &self.config)
            .field("flags", &self.flags)
            .field("period_frames", &self.period_frames)
            .field("capacity", &self.capacity)
            .field("state", &self.state())
            .field("is_hwsync", &self.is_hwsync())
            .finish()
    }
}

impl InputPort {
    /// Create a port for a stream opened with `flags`
    ///
    /// # Errors
    /// - `UnsupportedConfiguration`: format other than S16/S32, more than two
    ///   channels, or a sample rate different from the output's
    /// - `InvalidArgument`: volume outside [0, 1], or a metadata provider on
    ///   the system slot
    /// - `ResourceExhausted`: ring or staging buffer allocation failed
    pub fn new(
        config: PcmConfig,
        flags: OutputFlags,
        mixer: &MixerConfig,
        output_rate: u32,
        options: PortOptions,
    ) -> Result<Self> {
        let slot = PortSlot::from_flags(flags);
        Self::validate(slot, &config, output_rate, &options)?;

        let period_frames = mixer.period_frames;
        let period_bytes = config.bytes_for_frames(period_frames);
        let capacity = period_bytes * mixer.inport_buffer_periods;

        let rb = HeapRb::<u8>::try_new(capacity).map_err(|e| {
            MixerError::ResourceExhausted(format!("{} port ring of {} bytes: {}", slot, capacity, e))
        })?;
        let (prod, cons) = rb.split();

        let mut staged = Vec::new();
        staged.try_reserve_exact(period_bytes).map_err(|e| {
            MixerError::ResourceExhausted(format!("{} port staging buffer: {}", slot, e))
        })?;
        staged.resize(period_bytes, 0);

        debug!(
            "Creating {} input port: {} flags={:#x} ring={} bytes ({} periods) hwsync={}",
            slot,
            config,
            flags.bits(),
            capacity,
            mixer.inport_buffer_periods,
            options.metadata_provider.is_some()
        );

        Ok(Self {
            slot,
            config,
            flags,
            period_frames,
            period_bytes,
            capacity,
            fade_bytes: mixer.fade_periods * period_bytes,
            producer: Mutex::new(prod),
            consumer: Mutex::new(ConsumerSide {
                cons,
                staged,
                staged_len: 0,
                faded: false,
            }),
            meta: Mutex::new(PortMeta {
                state: PortState::Created,
                volume: options.volume,
                padding_frames: 0,
                budgets: HwsyncBudgets::default(),
                messages: VecDeque::with_capacity(MESSAGE_QUEUE_CAPACITY),
                mix_consumed_frames: 0,
                consumed_bytes: 0,
                initial_frames: options.initial_frames,
                presentation_frames: options.initial_frames,
                timestamp: None,
                pts_valid: false,
                fade: None,
                flush_count: 0,
            }),
            observer: options.observer,
            metadata_provider: options.metadata_provider,
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        })
    }

    fn validate(
        slot: PortSlot,
        config: &PcmConfig,
        output_rate: u32,
        options: &PortOptions,
    ) -> Result<()> {
        if !matches!(config.format, SampleFormat::S16 | SampleFormat::S32) {
            return Err(MixerError::UnsupportedConfiguration(format!(
                "input ports take s16 or s32 PCM, not {}",
                config.format
            )));
        }
        if !(1..=2).contains(&config.channels) {
            return Err(MixerError::UnsupportedConfiguration(format!(
                "input ports take 1 or 2 channels, not {}",
                config.channels
            )));
        }
        if config.sample_rate != output_rate {
            return Err(MixerError::UnsupportedConfiguration(format!(
                "input rate {}Hz differs from output rate {}Hz",
                config.sample_rate, output_rate
            )));
        }
        check_volume(options.volume)?;
        if options.metadata_provider.is_some() && slot != PortSlot::Direct {
            return Err(MixerError::InvalidArgument(format!(
                "hwsync metadata provider given for the {} port",
                slot
            )));
        }
        Ok(())
    }

    pub fn slot(&self) -> PortSlot {
        self.slot
    }

    pub fn config(&self) -> &PcmConfig {
        &self.config
    }

    pub fn flags(&self) -> OutputFlags {
        self.flags
    }

    pub fn period_bytes(&self) -> usize {
        self.period_bytes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_hwsync(&self) -> bool {
        self.metadata_provider.is_some()
    }

    pub fn state(&self) -> PortState {
        self.meta.lock().state
    }

    // ---- producer side ----

    /// Queue PCM from the stream; returns the bytes accepted
    ///
    /// Only whole frames are accepted. A short count means the ring is full:
    /// retry after `on_input_available`. The first successful write activates
    /// a created or flushed port.
    pub fn write(&self, data: &[u8]) -> usize {
        let frame_size = self.config.frame_size();
        let mut prod = self.producer.lock();
        let len = data.len().min(prod.vacant_len()) / frame_size * frame_size;
        let written = if len > 0 { prod.push_slice(&data[..len]) } else { 0 };
        drop(prod);

        if written == 0 {
            return 0;
        }
        self.bytes_written.fetch_add(written as u64, Ordering::Relaxed);

        let activated = {
            let mut meta = self.meta.lock();
            if meta.state.activates_on_write() {
                meta.state = PortState::Active;
                true
            } else {
                false
            }
        };
        if activated {
            info!("{} port active", self.slot);
            self.notify_state(PortState::Active);
        }

        trace!("{} port write: {}/{} bytes", self.slot, written, data.len());
        written
    }

    /// Free bytes in the ring
    pub fn vacant_bytes(&self) -> usize {
        self.producer.lock().vacant_len()
    }

    // ---- consumer side ----

    /// Pull up to `buf.len()` bytes straight from the ring, with frame accounting
    ///
    /// The mixing thread uses [`stage`](Self::stage); this is the same
    /// consumer path for callers driving a port by hand.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let frame_size = self.config.frame_size();
        let mut side = self.consumer.lock();
        let len = buf.len().min(side.cons.occupied_len()) / frame_size * frame_size;
        let read = side.cons.pop_slice(&mut buf[..len]);
        drop(side);

        self.bytes_read.fetch_add(read as u64, Ordering::Relaxed);
        self.account(read);
        read
    }

    /// Bytes waiting in the ring
    pub fn occupied_bytes(&self) -> usize {
        self.consumer.lock().cons.occupied_len()
    }

    /// Stage one period for this tick
    ///
    /// A FLUSHING port is reset here. A block held back by a hwsync insert
    /// stays staged and is reported ready without reading more; a fade that
    /// began while it was held is applied to it first.
    pub fn stage(&self) -> StageOutcome {
        let mut side = self.consumer.lock();
        let mut deferred = Deferred::default();

        let outcome = {
            let mut meta = self.meta.lock();
            let current = meta.state;
            match current {
                PortState::Flushing => {
                    self.reset_locked(&mut side, &mut meta);
                    meta.state = PortState::Flushed;
                    deferred.state = Some(PortState::Flushed);
                    StageOutcome::Flushed
                }
                state if !state.reads_data() => StageOutcome::NotReady,
                _ if side.staged_len == self.period_bytes => {
                    if !side.faded {
                        self.fade_staged(&mut side, &mut meta, &mut deferred);
                    }
                    StageOutcome::Ready
                }
                state => {
                    if side.cons.occupied_len() < self.period_bytes {
                        if state == PortState::Pausing {
                            // nothing left to fade out
                            meta.fade = None;
                            meta.state = PortState::Paused;
                            deferred.state = Some(PortState::Paused);
                        }
                        StageOutcome::NotReady
                    } else {
                        let period = self.period_bytes;
                        let ConsumerSide { cons, staged, staged_len, faded } = &mut *side;
                        *staged_len = cons.pop_slice(&mut staged[..period]);
                        *faded = false;
                        self.bytes_read.fetch_add(*staged_len as u64, Ordering::Relaxed);

                        self.fade_staged(&mut side, &mut meta, &mut deferred);
                        StageOutcome::Ready
                    }
                }
            }
        };
        drop(side);

        self.deliver(deferred);
        outcome
    }

    /// Run the active fade over the staged block; a finished fade settles the state
    fn fade_staged(&self, side: &mut ConsumerSide, meta: &mut PortMeta, deferred: &mut Deferred) {
        let Some(fade) = meta.fade.as_mut() else {
            return;
        };
        let len = side.staged_len;
        fade.process(&mut side.staged[..len], self.config.format);
        side.faded = true;

        if fade.is_complete() {
            let next = match fade.direction() {
                FadeDirection::Out => PortState::Paused,
                FadeDirection::In => PortState::Active,
            };
            meta.fade = None;
            meta.state = next;
            deferred.state = Some(next);
        }
    }

    /// Bytes currently staged
    pub fn staged_len(&self) -> usize {
        self.consumer.lock().staged_len
    }

    /// Run `f` over the staged block together with the port volume
    pub(crate) fn with_staged<R>(&self, f: impl FnOnce(&[u8], f32) -> R) -> R {
        let side = self.consumer.lock();
        let volume = self.meta.lock().volume;
        f(&side.staged[..side.staged_len], volume)
    }

    /// Drop the staged block and count its frames as consumed
    pub fn release_staged(&self) {
        let mut side = self.consumer.lock();
        let len = std::mem::take(&mut side.staged_len);
        drop(side);
        self.account(len);
    }

    fn account(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let frames = (bytes / self.config.frame_size()) as u64;
        let mut meta = self.meta.lock();

        let padding = meta.padding_frames.min(frames);
        meta.padding_frames -= padding;
        let real = frames - padding;

        if real > 0 {
            meta.mix_consumed_frames += real;
            meta.consumed_bytes += real * self.config.frame_size() as u64;
            meta.pts_valid = true;
        } else {
            meta.pts_valid = false;
        }
    }

    // ---- control ----

    /// Queue a control message for the mixing thread
    pub fn post_message(&self, msg: PortMessage) -> Result<()> {
        let mut meta = self.meta.lock();
        if meta.messages.len() >= MESSAGE_QUEUE_CAPACITY {
            return Err(MixerError::ResourceExhausted(format!(
                "{} port message queue full ({} pending)",
                self.slot,
                meta.messages.len()
            )));
        }
        meta.messages.push_back(msg);
        debug!("{} port queued {}", self.slot, msg);
        Ok(())
    }

    pub fn pending_messages(&self) -> usize {
        self.meta.lock().messages.len()
    }

    /// Apply the oldest queued message, if it applies now
    ///
    /// Returns the state entered, if any.
    pub fn apply_pending_message(&self) -> Option<PortState> {
        let mut deferred = Deferred::default();
        {
            let mut meta = self.meta.lock();
            let msg = *meta.messages.front()?;

            match meta.state.on_message(msg, self.slot.fades()) {
                Transition::Enter(next) => {
                    meta.messages.pop_front();
                    match next {
                        PortState::Pausing => {
                            meta.fade = Some(FadeController::fade_out(
                                self.fade_bytes,
                                self.config.frame_size(),
                            ));
                            deferred.pause_hook = true;
                        }
                        PortState::Resuming => {
                            meta.fade = Some(FadeController::fade_in(
                                self.fade_bytes,
                                self.config.frame_size(),
                            ));
                            deferred.resume_hook = true;
                        }
                        _ => {}
                    }
                    info!("{} port {} -> {} on {}", self.slot, meta.state, next, msg);
                    meta.state = next;
                    deferred.state = Some(next);
                }
                Transition::Defer => {
                    trace!("{} port holds {} while {}", self.slot, msg, meta.state);
                }
                Transition::Ignore => {
                    meta.messages.pop_front();
                    debug!("{} port drops {} in state {}", self.slot, msg, meta.state);
                }
            }
        }

        let entered = deferred.state;
        self.deliver(deferred);
        entered
    }

    /// Reset the port immediately, as an applied FLUSH would
    ///
    /// Used by explicit drains. A created port has nothing to flush.
    pub fn flush_now(&self) {
        let mut side = self.consumer.lock();
        let flushed = {
            let mut meta = self.meta.lock();
            if meta.state == PortState::Created {
                false
            } else {
                self.reset_locked(&mut side, &mut meta);
                meta.messages.clear();
                meta.state = PortState::Flushed;
                true
            }
        };
        drop(side);

        if flushed {
            self.notify_state(PortState::Flushed);
        }
    }

    fn reset_locked(&self, side: &mut ConsumerSide, meta: &mut PortMeta) {
        let dropped = side.cons.clear();
        side.staged_len = 0;
        side.faded = false;

        meta.initial_frames = meta.presentation_frames;
        meta.mix_consumed_frames = 0;
        meta.consumed_bytes = 0;
        meta.padding_frames = 0;
        meta.budgets.reset();
        meta.timestamp = None;
        meta.pts_valid = false;
        meta.fade = None;
        meta.flush_count += 1;

        info!(
            "{} port flushed: dropped {} bytes, position held at {} frames",
            self.slot, dropped, meta.initial_frames
        );
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        check_volume(volume)?;
        self.meta.lock().volume = volume;
        debug!("{} port volume {:.3}", self.slot, volume);
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        self.meta.lock().volume
    }

    /// Declare leading bytes as alignment silence, excluded from consumed frames
    pub fn set_padding_bytes(&self, bytes: usize) {
        let frames = (bytes / self.config.frame_size()) as u64;
        self.meta.lock().padding_frames = frames;
        debug!("{} port padding {} frames", self.slot, frames);
    }

    pub fn padding_frames(&self) -> u64 {
        self.meta.lock().padding_frames
    }

    // ---- hwsync ----

    /// Decide what happens to the staged block for A/V sync
    ///
    /// Consults the metadata provider when no skip is pending and the insert
    /// budget cannot cover the staged block, then drains the budgets by the
    /// staged size. Ports without
    /// a provider, or a zero `hwsync_frame_size`, always pass.
    pub fn hwsync_correction(&self, hwsync_frame_size: u32) -> Correction {
        let Some(provider) = self.metadata_provider.as_ref() else {
            return Correction::Pass;
        };
        if hwsync_frame_size == 0 {
            return Correction::Pass;
        }

        let staged = self.staged_len();
        let query_offset = {
            let meta = self.meta.lock();
            meta.budgets
                .needs_query(staged)
                .then(|| aligned_offset(meta.consumed_bytes, hwsync_frame_size))
        };

        let drift = match query_offset.map(|offset| (offset, provider.query_drift(offset))) {
            Some((offset, Ok((header, drift_ms)))) => {
                trace!(
                    "{} port hwsync offset={} pts={}ns payload={} drift={}ms",
                    self.slot,
                    offset,
                    header.pts_ns,
                    header.payload_size,
                    drift_ms
                );
                Some(drift_ms)
            }
            Some((offset, Err(DriftQueryError::Again))) => {
                trace!("{} port no hwsync header at {} yet", self.slot, offset);
                None
            }
            Some((offset, Err(e))) => {
                warn!("{} port hwsync query at {} failed: {}", self.slot, offset, e);
                None
            }
            None => None,
        };

        let mut meta = self.meta.lock();
        if let Some(drift_ms) = drift {
            meta.budgets.apply_drift(drift_ms, &self.config);
        }
        meta.budgets.consume(staged)
    }

    pub fn hwsync_budgets(&self) -> HwsyncBudgets {
        self.meta.lock().budgets
    }

    // ---- positions ----

    /// Refresh `presentation_frames` from a fresh sink counter
    ///
    /// Ignored while the port has no valid (non-padding) consumption.
    pub fn update_presentation(&self, sink_buffer_frames: u64, ts: &HardwareTimestamp) {
        let mut meta = self.meta.lock();
        if !meta.pts_valid {
            return;
        }
        let presented = (meta.mix_consumed_frames + ts.avail_frames).saturating_sub(sink_buffer_frames);
        let frames = meta.initial_frames + presented;
        meta.presentation_frames = meta.presentation_frames.max(frames);
        meta.timestamp = Some(ts.at);
    }

    /// Frames presented and the time they were measured
    pub fn presentation_position(&self) -> Result<(u64, Instant)> {
        let meta = self.meta.lock();
        match meta.timestamp {
            Some(at) if meta.pts_valid => Ok((meta.presentation_frames, at)),
            _ => Err(MixerError::TimestampUnavailable(self.slot)),
        }
    }

    /// Presented frames since the last flush
    pub fn frames_since_flush(&self) -> u64 {
        let meta = self.meta.lock();
        meta.presentation_frames - meta.initial_frames
    }

    pub fn consumed_frames(&self) -> u64 {
        self.meta.lock().mix_consumed_frames
    }

    /// Queued frames plus the period being mixed
    pub fn latency_frames(&self) -> u32 {
        let queued = self.occupied_bytes() / self.config.frame_size();
        (queued + self.period_frames) as u32
    }

    // ---- notifications ----

    fn notify_state(&self, state: PortState) {
        if let Some(observer) = &self.observer {
            observer.on_state_changed(self.slot, state);
        }
    }

    pub(crate) fn notify_input_available(&self) {
        if let Some(observer) = &self.observer {
            observer.on_input_available(self.slot);
        }
    }

    pub(crate) fn notify_mixer_exit(&self) {
        if let Some(observer) = &self.observer {
            observer.on_mixer_exit(self.slot);
        }
    }

    fn deliver(&self, deferred: Deferred) {
        if let Some(provider) = &self.metadata_provider {
            if deferred.pause_hook {
                provider.on_pause();
            }
            if deferred.resume_hook {
                provider.on_resume();
            }
        }
        if let Some(state) = deferred.state {
            self.notify_state(state);
        }
    }

    pub fn snapshot(&self) -> PortSnapshot {
        let side = self.consumer.lock();
        let occupied = side.cons.occupied_len();
        let staged = side.staged_len;
        let meta = self.meta.lock();

        PortSnapshot {
            slot: self.slot,
            state: meta.state,
            format: self.config.format,
            channels: self.config.channels,
            sample_rate: self.config.sample_rate,
            period_frames: self.period_frames,
            staged_bytes: staged,
            is_hwsync: self.is_hwsync(),
            ring_capacity: self.capacity,
            ring_occupied: occupied,
            volume: meta.volume,
            padding_frames: meta.padding_frames,
            bytes_to_insert: meta.budgets.bytes_to_insert,
            bytes_to_skip: meta.budgets.bytes_to_skip,
            pending_messages: meta.messages.len(),
            mix_consumed_frames: meta.mix_consumed_frames,
            initial_frames: meta.initial_frames,
            presentation_frames: meta.presentation_frames,
            flush_count: meta.flush_count,
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}

fn check_volume(volume: f32) -> Result<()> {
    if (0.0..=1.0).contains(&volume) {
        Ok(())
    } else {
        Err(MixerError::InvalidArgument(format!(
            "volume {} outside [0, 1]",
            volume
        )))
    }
}
