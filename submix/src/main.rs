//! submix-run: drive the mixer from a TOML scenario
//!
//! Each `[[source]]` becomes an input port fed by a sine tone task; the mixed
//! stream goes to the configured sink (WAV file or null). On exit the mixer
//! snapshot is printed as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use submix::audio::{NullSink, PcmSink, ToneGenerator, WavSink};
use submix::mixer::{
    AudioMixer, HostDevice, OutputFlags, PortObserver, PortOptions, PortSlot, PortState,
};
use submix::MixerConfig;
use submix_common::config::{self, SinkKind, SourceSection, SourceSlot, TomlConfig};
use submix_common::{logging, PcmConfig};
use tokio::signal;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Command-line arguments for submix-run
#[derive(Parser, Debug)]
#[command(name = "submix-run")]
#[command(about = "Mix generated test tones through the submix engine")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = config::CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Total run time; defaults to the longest source plus a short tail
    #[arg(short, long)]
    duration_ms: Option<u64>,

    /// Record the mix to this WAV file (overrides `[sink]`)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Wakes a source task when its port has room again
struct SourceObserver {
    space: Arc<Notify>,
}

impl PortObserver for SourceObserver {
    fn on_state_changed(&self, slot: PortSlot, state: PortState) {
        debug!("{} port is now {}", slot, state);
    }

    fn on_input_available(&self, _slot: PortSlot) {
        self.space.notify_one();
    }

    fn on_mixer_exit(&self, slot: PortSlot) {
        info!("Mixer exited while {} port was open", slot);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_path) =
        config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    logging::init(&config.logging).context("Failed to initialise logging")?;

    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let output = PcmConfig::new(
        config.output.sample_rate,
        config.output.channels,
        config.output.format,
    );
    let sink = build_sink(&config, &output, args.output.clone())?;

    let device = Arc::new(HostDevice::new());
    device
        .set_sink_gain(config.mixer.sink_gain)
        .context("Invalid sink gain")?;
    device.set_speaker_gain_enabled(config.mixer.apply_sink_gain);

    let mixer_config = MixerConfig::from(&config.mixer);
    let period = Duration::from_nanos(
        output.frames_to_nanos(mixer_config.period_frames as u64),
    );
    let mixer = Arc::new(
        AudioMixer::new(mixer_config, output, sink, device).context("Failed to create mixer")?,
    );

    let sources = if config.sources.is_empty() {
        info!("No [[source]] configured, playing one default tone");
        vec![SourceSection::default()]
    } else {
        config.sources.clone()
    };

    let mut tasks = JoinSet::new();
    for source in &sources {
        let space = Arc::new(Notify::new());
        let slot = open_source(&mixer, source, output.sample_rate, Arc::clone(&space))?;
        let tone = ToneGenerator::new(
            PcmConfig::new(output.sample_rate, source.channels, source.format),
            source.frequency_hz,
            source.amplitude,
        );
        tasks.spawn(feed_source(
            Arc::clone(&mixer),
            slot,
            tone,
            source.duration_ms,
            period,
            space,
        ));
    }

    mixer.start_thread().context("Failed to start mixer thread")?;

    let run_for = Duration::from_millis(args.duration_ms.unwrap_or_else(|| {
        sources.iter().map(|s| s.duration_ms).max().unwrap_or(0) + 100
    }));
    info!("Running for {:?} with {} source(s)", run_for, sources.len());

    tokio::select! {
        _ = tokio::time::sleep(run_for) => {
            info!("Run time elapsed");
        }
        _ = wait_sources(&mut tasks) => {
            // let the mixer drain what the sources queued
            tokio::time::sleep(period * mixer.config().inport_buffer_periods as u32 * 2).await;
            info!("All sources finished");
        }
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Ctrl+C handler failed: {}", e);
            }
            info!("Received Ctrl+C, shutting down");
        }
    }

    tasks.abort_all();
    mixer.stop_thread().context("Failed to stop mixer thread")?;

    let snapshot = mixer.snapshot();
    info!("Final state:\n{}", snapshot);
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to serialise snapshot")?
    );
    Ok(())
}

fn build_sink(
    config: &TomlConfig,
    output: &PcmConfig,
    cli_output: Option<PathBuf>,
) -> Result<Box<dyn PcmSink>> {
    let wav_path = match (cli_output, config.sink.kind) {
        (Some(path), _) => Some(path),
        (None, SinkKind::Wav) => Some(config.sink.path.clone().unwrap_or_else(|| {
            PathBuf::from(format!(
                "submix-{}.wav",
                chrono::Local::now().format("%Y%m%d-%H%M%S")
            ))
        })),
        (None, SinkKind::Null) => None,
    };

    match wav_path {
        Some(path) => {
            info!("Recording mix to {}", path.display());
            Ok(Box::new(
                WavSink::new(&path, *output).context("Failed to create WAV sink")?,
            ))
        }
        None => Ok(Box::new(NullSink::new(
            *output,
            config.output.buffer_frames,
            config.output.latency_frames,
        ))),
    }
}

fn open_source(
    mixer: &AudioMixer,
    source: &SourceSection,
    sample_rate: u32,
    space: Arc<Notify>,
) -> Result<PortSlot> {
    let flags = match source.slot {
        SourceSlot::System => OutputFlags::PRIMARY,
        SourceSlot::Direct => OutputFlags::DIRECT,
    };
    let options = PortOptions::default()
        .with_volume(source.volume)
        .with_observer(Arc::new(SourceObserver { space }));

    let slot = mixer
        .create_input_port(
            PcmConfig::new(sample_rate, source.channels, source.format),
            flags,
            options,
        )
        .with_context(|| format!("Failed to open {:?} source", source.slot))?;
    if source.padding_bytes > 0 {
        mixer.set_padding_bytes(slot, source.padding_bytes)?;
    }
    Ok(slot)
}

/// Push one tone into `slot` in period-sized blocks, retrying short writes
async fn feed_source(
    mixer: Arc<AudioMixer>,
    slot: PortSlot,
    mut tone: ToneGenerator,
    duration_ms: u64,
    period: Duration,
    space: Arc<Notify>,
) -> Result<()> {
    let period_frames = mixer.config().period_frames;
    let total_frames = tone.config().sample_rate as u64 * duration_ms / 1000;
    let mut interval = tokio::time::interval(period);

    while tone.frames_generated() < total_frames {
        let frames = (total_frames - tone.frames_generated()).min(period_frames as u64) as usize;
        let block = tone.next_block(frames);

        let mut offset = 0;
        while offset < block.len() {
            offset += mixer.write(slot, &block[offset..])?;
            if offset < block.len() {
                tokio::select! {
                    _ = space.notified() => {}
                    _ = interval.tick() => {}
                }
            }
        }
        interval.tick().await;
    }

    info!("{} source done: {} frames", slot, tone.frames_generated());
    Ok(())
}

async fn wait_sources(tasks: &mut JoinSet<Result<()>>) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Source failed: {:#}", e),
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Source task panicked: {}", e),
        }
    }
}
