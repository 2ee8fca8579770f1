//! The mixer: port table, output port and mixing-thread lifecycle
//!
//! All collaborator-facing operations live on [`AudioMixer`]. Ports are
//! addressed by [`PortSlot`]; an empty slot is `InvalidArgument`.
//!
//! ## Lock order
//!
//! `control` → `ports` → port internals, and `control` → `output`. The tick
//! clones the port `Arc`s out of the table so creation and destruction only
//! ever block it for the duration of that copy, and takes `output` only
//! while it writes. Callbacks run with none of these held.

use super::device::HostDevice;
use super::engine::{PortTable, TickContext, TickReport, TickRunner};
use super::input_port::{InputPort, PortOptions};
use super::output_port::OutputPort;
use super::snapshot::{MixerSnapshot, OutputSnapshot};
use super::thread;
use super::types::{
    DrainKind, MixerState, OutputFlags, PortMessage, PortSlot, PortState, RunState,
};
use crate::audio::PcmSink;
use crate::config::MixerConfig;
use crate::error::{MixerError, Result};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use submix_common::PcmConfig;
use tracing::{debug, info, warn};

/// Run-state handshake and pending drain, guarded together
#[derive(Debug)]
pub(crate) struct ControlBlock {
    pub run_state: RunState,
    pub drain: Option<DrainKind>,
}

/// State shared between the controller API and the mixing thread
pub(crate) struct Shared {
    pub config: MixerConfig,
    pub output_config: PcmConfig,
    pub ports: RwLock<PortTable>,
    pub output: Mutex<OutputPort>,
    pub device: Arc<HostDevice>,
    pub control: Mutex<ControlBlock>,
    pub wake: Condvar,
    pub hwsync_frame_size: AtomicU32,
    pub continuous_output: AtomicBool,
    pub ticks: AtomicU64,
}

impl Shared {
    /// Logical state from the port table and any pending drain
    pub fn compute_state(&self, drain: Option<DrainKind>) -> MixerState {
        match drain {
            Some(DrainKind::Track) => return MixerState::DrainTrack,
            Some(DrainKind::All) => return MixerState::DrainAll,
            None => {}
        }

        let ports = self.ports.read();
        let mut any = false;
        for port in ports.iter().flatten() {
            any = true;
            if port.state().is_ready() {
                return MixerState::InportsReady;
            }
        }
        if any {
            MixerState::InportsEnabled
        } else {
            MixerState::Idle
        }
    }

    /// Wake the thread if it is blocked waiting for work
    pub fn kick(&self) {
        let _control = self.control.lock();
        self.wake.notify_all();
    }

    /// Run one tick, applying `drain` first
    ///
    /// No lock is held across observer or metadata-provider callbacks.
    pub fn tick_once(&self, runner: &mut TickRunner, drain: Option<DrainKind>) -> Result<TickReport> {
        let ports: PortTable = self.ports.read().clone();

        if let Some(kind) = drain {
            self.apply_drain(kind, &ports)?;
        }

        let ctx = TickContext {
            ports: &ports,
            output: &self.output,
            device: &self.device,
            hwsync_frame_size: self.hwsync_frame_size.load(Ordering::Relaxed),
            continuous_output: self.continuous_output.load(Ordering::Relaxed),
        };
        let report = runner.tick(&ctx);
        self.ticks.fetch_add(1, Ordering::Relaxed);
        report
    }

    fn apply_drain(&self, kind: DrainKind, ports: &PortTable) -> Result<()> {
        info!("Applying {:?} drain", kind);
        match kind {
            DrainKind::Track => {
                if let Some(port) = &ports[PortSlot::Direct.index()] {
                    port.flush_now();
                }
            }
            DrainKind::All => {
                for port in ports.iter().flatten() {
                    port.flush_now();
                }
                self.output.lock().standby()?;
            }
        }
        Ok(())
    }

    pub fn take_drain(&self) -> Option<DrainKind> {
        self.control.lock().drain.take()
    }
}

/// Real-time multi-port PCM mixer
///
/// Owns one output port and up to [`PORT_SLOT_COUNT`](super::PORT_SLOT_COUNT)
/// input ports. Mixing runs either on the dedicated thread
/// ([`start_thread`](Self::start_thread)) or tick-by-tick under caller control
/// ([`process_tick`](Self::process_tick)).
pub struct AudioMixer {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,

    /// Tick body for manual ticking, built on first use
    manual_runner: Mutex<Option<TickRunner>>,
}

impl std::fmt::Debug for AudioMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioMixer")
            .field("config", &self.shared.config)
            .field("output_config", &self.shared.output_config)
            .field("state", &self.mixer_state())
            .field("run_state", &self.run_state())
            .finish()
    }
}

impl AudioMixer {
    /// Create a mixer writing `output_config` PCM to `sink`
    ///
    /// The output format is checked when mixing starts, not here.
    ///
    /// # Errors
    /// - `InvalidArgument` for an invalid `config` or an empty output layout
    /// - `ResourceExhausted` if the output buffer cannot be allocated
    pub fn new(
        config: MixerConfig,
        output_config: PcmConfig,
        sink: Box<dyn PcmSink>,
        device: Arc<HostDevice>,
    ) -> Result<Self> {
        config.validate()?;
        if output_config.sample_rate == 0 || output_config.channels == 0 {
            return Err(MixerError::InvalidArgument(format!(
                "output needs a sample rate and at least one channel ({})",
                output_config
            )));
        }

        let output = OutputPort::new(output_config, config.period_frames, sink)?;
        info!(
            "Mixer created: output {} period={} frames continuous={}",
            output_config, config.period_frames, config.continuous_output
        );

        Ok(Self {
            shared: Arc::new(Shared {
                hwsync_frame_size: AtomicU32::new(config.hwsync_frame_size),
                continuous_output: AtomicBool::new(config.continuous_output),
                config,
                output_config,
                ports: RwLock::new([None, None]),
                output: Mutex::new(output),
                device,
                control: Mutex::new(ControlBlock {
                    run_state: RunState::Exited,
                    drain: None,
                }),
                wake: Condvar::new(),
                ticks: AtomicU64::new(0),
            }),
            thread: Mutex::new(None),
            manual_runner: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MixerConfig {
        &self.shared.config
    }

    pub fn output_config(&self) -> &PcmConfig {
        &self.shared.output_config
    }

    pub fn device(&self) -> &Arc<HostDevice> {
        &self.shared.device
    }

    /// Slot at a table index; `InvalidArgument` when out of range
    pub fn slot_at(index: usize) -> Result<PortSlot> {
        PortSlot::from_index(index)
            .ok_or_else(|| MixerError::InvalidArgument(format!("no port slot {}", index)))
    }

    // ---- port lifecycle ----

    /// Create the input port for a stream opened with `flags`
    ///
    /// An existing port in the same slot is replaced. Returns the slot used.
    pub fn create_input_port(
        &self,
        config: PcmConfig,
        flags: OutputFlags,
        options: PortOptions,
    ) -> Result<PortSlot> {
        let port = Arc::new(InputPort::new(
            config,
            flags,
            &self.shared.config,
            self.shared.output_config.sample_rate,
            options,
        )?);
        let slot = port.slot();

        let previous = self.shared.ports.write()[slot.index()].replace(port);
        if previous.is_some() {
            warn!("Replaced existing {} port", slot);
        }
        info!("Created {} input port ({})", slot, config);
        self.shared.kick();
        Ok(slot)
    }

    pub fn destroy_input_port(&self, slot: PortSlot) -> Result<()> {
        let removed = self.shared.ports.write()[slot.index()].take();
        match removed {
            Some(_) => {
                info!("Destroyed {} input port", slot);
                self.shared.kick();
                Ok(())
            }
            None => Err(MixerError::InvalidArgument(format!("no {} port to destroy", slot))),
        }
    }

    /// The port in `slot`
    pub fn port(&self, slot: PortSlot) -> Result<Arc<InputPort>> {
        self.shared.ports.read()[slot.index()]
            .clone()
            .ok_or_else(|| MixerError::InvalidArgument(format!("no {} port", slot)))
    }

    pub fn has_port(&self, slot: PortSlot) -> bool {
        self.shared.ports.read()[slot.index()].is_some()
    }

    // ---- data path ----

    /// Queue PCM on a port; a short count is normal and means "retry later"
    pub fn write(&self, slot: PortSlot, data: &[u8]) -> Result<usize> {
        let port = self.port(slot)?;
        let was_ready = port.state().is_ready();
        let written = port.write(data);
        if written > 0 && !was_ready {
            self.shared.kick();
        }
        Ok(written)
    }

    /// Pull bytes from a port's ring directly
    pub fn read(&self, slot: PortSlot, buf: &mut [u8]) -> Result<usize> {
        Ok(self.port(slot)?.read(buf))
    }

    // ---- control ----

    pub fn post_message(&self, slot: PortSlot, msg: PortMessage) -> Result<()> {
        self.port(slot)?.post_message(msg)?;
        self.shared.kick();
        Ok(())
    }

    pub fn set_volume(&self, slot: PortSlot, volume: f32) -> Result<()> {
        self.port(slot)?.set_volume(volume)
    }

    pub fn volume(&self, slot: PortSlot) -> Result<f32> {
        Ok(self.port(slot)?.volume())
    }

    pub fn set_padding_bytes(&self, slot: PortSlot, bytes: usize) -> Result<()> {
        self.port(slot)?.set_padding_bytes(bytes);
        Ok(())
    }

    pub fn set_hwsync_frame_size(&self, frame_size: u32) {
        self.shared.hwsync_frame_size.store(frame_size, Ordering::Relaxed);
        debug!("hwsync frame size {}", frame_size);
    }

    pub fn hwsync_frame_size(&self) -> u32 {
        self.shared.hwsync_frame_size.load(Ordering::Relaxed)
    }

    pub fn set_continuous_output(&self, enabled: bool) {
        self.shared.continuous_output.store(enabled, Ordering::Relaxed);
        info!("Continuous output: {}", enabled);
        self.shared.kick();
    }

    pub fn continuous_output(&self) -> bool {
        self.shared.continuous_output.load(Ordering::Relaxed)
    }

    pub fn set_output_dummy(&self, enabled: bool) {
        self.shared.output.lock().set_dummy(enabled);
    }

    /// Put the sink into standby now
    pub fn stop_output_pcm(&self) -> Result<()> {
        self.shared.output.lock().standby()
    }

    /// Ask for an explicit drain, applied at the start of the next tick
    pub fn drain(&self, kind: DrainKind) {
        let mut control = self.shared.control.lock();
        control.drain = Some(kind);
        self.shared.wake.notify_all();
        info!("{:?} drain requested", kind);
    }

    // ---- queries ----

    /// Frames presented for `slot` and when that was measured
    ///
    /// Fails with `TimestampUnavailable` until the sink has reported a valid
    /// counter for data from this port.
    pub fn presentation_position(&self, slot: PortSlot) -> Result<(u64, Instant)> {
        self.port(slot)?.presentation_position()
    }

    pub fn frames_since_flush(&self, slot: PortSlot) -> Result<u64> {
        Ok(self.port(slot)?.frames_since_flush())
    }

    pub fn consumed_frames(&self, slot: PortSlot) -> Result<u64> {
        Ok(self.port(slot)?.consumed_frames())
    }

    pub fn inport_latency_frames(&self, slot: PortSlot) -> Result<u32> {
        Ok(self.port(slot)?.latency_frames())
    }

    pub fn output_latency_frames(&self) -> u32 {
        self.shared.output.lock().latency_frames()
    }

    /// Latency the mix buffer itself adds: one period
    pub fn mixer_latency_frames(&self) -> u32 {
        self.shared.config.period_frames as u32
    }

    pub fn inport_state(&self, slot: PortSlot) -> Result<PortState> {
        Ok(self.port(slot)?.state())
    }

    pub fn mixer_state(&self) -> MixerState {
        let drain = self.shared.control.lock().drain;
        self.shared.compute_state(drain)
    }

    pub fn run_state(&self) -> RunState {
        self.shared.control.lock().run_state
    }

    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    // ---- thread lifecycle ----

    /// Spawn the mixing thread
    ///
    /// # Errors
    /// - `UnsupportedConfiguration` if no mixing routine exists for the
    ///   output format; no thread is created
    /// - `InvalidState` if the thread is already running
    /// - `Io` if the OS refuses the thread
    pub fn start_thread(&self) -> Result<()> {
        let mut handle = self.thread.lock();
        if handle.is_some() {
            return Err(MixerError::InvalidState("mixer thread already running".to_string()));
        }

        let runner = TickRunner::for_output(&self.shared.output_config, self.shared.config.period_frames)?;
        self.shared.control.lock().run_state = RunState::Running;

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("submix-mixer".to_string())
            .spawn(move || thread::run(shared, runner));

        match spawned {
            Ok(h) => {
                *handle = Some(h);
                info!("Mixer thread started ({} output)", self.shared.output_config.format);
                Ok(())
            }
            Err(e) => {
                self.shared.control.lock().run_state = RunState::Exited;
                Err(MixerError::Io(e))
            }
        }
    }

    /// Stop the mixing thread and wait for it
    ///
    /// The tick in progress completes first. Every port observer is told the
    /// mixer exited. Stopping a mixer that is not running is a no-op.
    pub fn stop_thread(&self) -> Result<()> {
        let Some(handle) = self.thread.lock().take() else {
            debug!("stop_thread: mixer thread not running");
            return Ok(());
        };

        {
            let mut control = self.shared.control.lock();
            control.run_state = RunState::ReqExit;
            self.shared.wake.notify_all();
        }

        if handle.join().is_err() {
            warn!("Mixer thread panicked");
        }
        self.shared.control.lock().run_state = RunState::Exited;
        info!("Mixer thread stopped");

        let ports: PortTable = self.shared.ports.read().clone();
        for port in ports.iter().flatten() {
            port.notify_mixer_exit();
        }
        Ok(())
    }

    pub fn is_thread_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Ask the thread to put the output into standby and sleep until `wake`
    ///
    /// Without a running thread the output goes into standby directly.
    pub fn request_standby(&self) -> Result<()> {
        if !self.is_thread_running() {
            return self.stop_output_pcm();
        }
        let mut control = self.shared.control.lock();
        if matches!(control.run_state, RunState::Running | RunState::ReqRun) {
            control.run_state = RunState::ReqSleep;
            self.shared.wake.notify_all();
            info!("Mixer standby requested");
        }
        Ok(())
    }

    /// Bring a sleeping thread back to running
    pub fn wake(&self) {
        let mut control = self.shared.control.lock();
        if matches!(control.run_state, RunState::Sleep | RunState::ReqSleep) {
            control.run_state = RunState::ReqRun;
            self.shared.wake.notify_all();
            info!("Mixer wake requested");
        }
    }

    /// Block until the thread acknowledged a standby request (or timeout)
    pub fn wait_for_run_state(&self, wanted: RunState, timeout: std::time::Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.shared.control.lock();
        while control.run_state != wanted {
            if self.shared.wake.wait_until(&mut control, deadline).timed_out() {
                return control.run_state == wanted;
            }
        }
        true
    }

    /// Run one tick on the calling thread
    ///
    /// # Errors
    /// - `InvalidState` while the mixing thread is running
    /// - `UnsupportedConfiguration` for an output format without a routine
    pub fn process_tick(&self) -> Result<TickReport> {
        if self.is_thread_running() {
            return Err(MixerError::InvalidState(
                "process_tick while the mixer thread is running".to_string(),
            ));
        }

        let mut runner = self.manual_runner.lock();
        if runner.is_none() {
            *runner = Some(TickRunner::for_output(
                &self.shared.output_config,
                self.shared.config.period_frames,
            )?);
        }
        let Some(runner) = runner.as_mut() else {
            return Err(MixerError::InvalidState("tick runner unavailable".to_string()));
        };

        let drain = self.shared.take_drain();
        self.shared.tick_once(runner, drain)
    }

    // ---- diagnostics ----

    pub fn snapshot(&self) -> MixerSnapshot {
        let ports: PortTable = self.shared.ports.read().clone();
        let output = {
            let out = self.shared.output.lock();
            OutputSnapshot {
                sink: out.sink_name().to_string(),
                format: out.config().format,
                channels: out.config().channels,
                sample_rate: out.config().sample_rate,
                period_frames: out.period_frames(),
                capacity: out.capacity(),
                started: out.is_started(),
                dummy: out.is_dummy(),
                frames_written: out.frames_written(),
            }
        };

        MixerSnapshot {
            state: self.mixer_state(),
            run_state: self.run_state(),
            continuous_output: self.continuous_output(),
            hwsync_frame_size: self.hwsync_frame_size(),
            ticks: self.ticks(),
            output,
            ports: ports.iter().flatten().map(|p| p.snapshot()).collect(),
        }
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        if let Err(e) = self.stop_thread() {
            warn!("Stopping mixer thread on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullSink;
    use submix_common::SampleFormat;

    fn mixer() -> AudioMixer {
        let output = PcmConfig::stereo_s16(48_000);
        AudioMixer::new(
            MixerConfig::default(),
            output,
            Box::new(NullSink::new(output, 1536, 0)),
            Arc::new(HostDevice::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_slot_is_invalid_argument() {
        let mixer = mixer();
        assert!(matches!(
            mixer.write(PortSlot::System, &[0u8; 4]),
            Err(MixerError::InvalidArgument(_))
        ));
        assert!(matches!(
            mixer.destroy_input_port(PortSlot::Direct),
            Err(MixerError::InvalidArgument(_))
        ));
        assert!(AudioMixer::slot_at(2).is_err());
        assert_eq!(AudioMixer::slot_at(1).unwrap(), PortSlot::Direct);
    }

    #[test]
    fn test_state_follows_ports() {
        let mixer = mixer();
        assert_eq!(mixer.mixer_state(), MixerState::Idle);

        mixer
            .create_input_port(PcmConfig::stereo_s16(48_000), OutputFlags::PRIMARY, PortOptions::default())
            .unwrap();
        assert_eq!(mixer.mixer_state(), MixerState::InportsEnabled);

        mixer.write(PortSlot::System, &[0u8; 64]).unwrap();
        assert_eq!(mixer.mixer_state(), MixerState::InportsReady);

        mixer.drain(DrainKind::All);
        assert_eq!(mixer.mixer_state(), MixerState::DrainAll);
        mixer.process_tick().unwrap();
        assert_eq!(mixer.mixer_state(), MixerState::InportsEnabled);
    }

    #[test]
    fn test_start_thread_rejects_float_output() {
        let output = PcmConfig::new(48_000, 2, SampleFormat::F32);
        let mixer = AudioMixer::new(
            MixerConfig::default(),
            output,
            Box::new(NullSink::new(output, 0, 0)),
            Arc::new(HostDevice::new()),
        )
        .unwrap();

        assert!(matches!(
            mixer.start_thread(),
            Err(MixerError::UnsupportedConfiguration(_))
        ));
        assert!(!mixer.is_thread_running());
        assert_eq!(mixer.run_state(), RunState::Exited);
    }

    #[test]
    fn test_provider_only_on_direct() {
        use crate::error::DriftQueryError;
        use crate::mixer::observer::{HwsyncHeader, HwsyncMetadataProvider};

        struct NoDrift;
        impl HwsyncMetadataProvider for NoDrift {
            fn query_drift(&self, _offset: u64) -> std::result::Result<(HwsyncHeader, i32), DriftQueryError> {
                Ok((HwsyncHeader::default(), 0))
            }
        }

        let mixer = mixer();
        let options = PortOptions::default().with_metadata_provider(Arc::new(NoDrift));
        assert!(matches!(
            mixer.create_input_port(PcmConfig::stereo_s16(48_000), OutputFlags::PRIMARY, options.clone()),
            Err(MixerError::InvalidArgument(_))
        ));
        let slot = mixer
            .create_input_port(PcmConfig::stereo_s16(48_000), OutputFlags::HW_AV_SYNC, options)
            .unwrap();
        assert_eq!(slot, PortSlot::Direct);
        assert!(mixer.port(slot).unwrap().is_hwsync());
    }

    #[test]
    fn test_latency_queries() {
        let mixer = mixer();
        assert_eq!(mixer.mixer_latency_frames(), 384);
        assert_eq!(mixer.output_latency_frames(), 1536);

        mixer
            .create_input_port(PcmConfig::stereo_s16(48_000), OutputFlags::PRIMARY, PortOptions::default())
            .unwrap();
        mixer.write(PortSlot::System, &[0u8; 400]).unwrap();
        assert_eq!(mixer.inport_latency_frames(PortSlot::System).unwrap(), 100 + 384);
    }
}
