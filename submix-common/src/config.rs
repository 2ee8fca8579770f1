//! Bootstrap configuration loading and config file resolution
//!
//! Configuration file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `SUBMIX_CONFIG` environment variable
//! 3. `<config dir>/submix/config.toml`
//! 4. Built-in defaults (fallback)
//!
//! A missing file is never fatal: a warning is logged and defaults are used.
//! A file that exists but does not parse is a configuration error.

use crate::pcm::SampleFormat;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "SUBMIX_CONFIG";

/// Complete bootstrap configuration
///
/// Every section is optional; absent sections and fields take built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Physical sink format
    pub output: OutputSection,

    /// Mixing engine tuning
    pub mixer: MixerSection,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Where the mixed stream goes
    pub sink: SinkSection,

    /// Test sources fed into the mixer by `submix-run`
    #[serde(rename = "source")]
    pub sources: Vec<SourceSection>,
}

/// Output (sink) PCM format
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,

    /// Frames queued inside the sink (kernel buffer) used for presentation math
    pub buffer_frames: u64,

    /// Extra device latency reported by the sink, in frames
    pub latency_frames: u32,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            format: SampleFormat::S16,
            buffer_frames: 3_072,
            latency_frames: 0,
        }
    }
}

/// Mixing engine tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixerSection {
    /// Frames mixed per tick
    pub period_frames: usize,

    /// Input ring buffer size, in periods
    pub inport_buffer_periods: usize,

    /// Pause/resume fade length, in periods
    pub fade_periods: usize,

    /// Periods the pacing clock may lag real time before it re-anchors
    pub preroll_periods: u32,

    /// Keep writing silence when no input has data
    pub continuous_output: bool,

    /// Frame size of the hwsync stream, 0 disables drift correction
    pub hwsync_frame_size: u32,

    /// Speaker gain applied to the mixed signal
    pub sink_gain: f32,

    /// Whether the speaker gain stage is enabled (TV products)
    pub apply_sink_gain: bool,
}

impl Default for MixerSection {
    fn default() -> Self {
        Self {
            period_frames: 384,
            inport_buffer_periods: 4,
            fade_periods: 1,
            preroll_periods: 4,
            continuous_output: false,
            hwsync_frame_size: 0,
            sink_gain: 1.0,
            apply_sink_gain: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Sink selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Discard the mixed stream (still paced like a device)
    #[default]
    Null,

    /// Record the mixed stream to a WAV file
    Wav,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SinkSection {
    pub kind: SinkKind,

    /// Output file for `kind = "wav"`; a timestamped name is used when absent
    pub path: Option<PathBuf>,
}

/// Input slot a source feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSlot {
    #[default]
    System,
    Direct,
}

/// A generated test tone
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub slot: SourceSlot,
    pub frequency_hz: f32,
    pub amplitude: f32,
    pub volume: f32,
    pub duration_ms: u64,
    pub padding_bytes: usize,
    pub channels: u16,
    pub format: SampleFormat,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            slot: SourceSlot::System,
            frequency_hz: 440.0,
            amplitude: 0.5,
            volume: 1.0,
            duration_ms: 1_000,
            padding_bytes: 0,
            channels: 2,
            format: SampleFormat::S16,
        }
    }
}

impl TomlConfig {
    /// Parse a configuration document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Reject values that can never produce a working mixer
    pub fn validate(&self) -> Result<()> {
        if self.output.sample_rate == 0 || self.output.channels == 0 {
            return Err(Error::Config(
                "output sample_rate and channels must be non-zero".to_string(),
            ));
        }
        if self.mixer.period_frames == 0 {
            return Err(Error::Config("mixer.period_frames must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.mixer.sink_gain) {
            return Err(Error::Config(format!(
                "mixer.sink_gain {} outside [0, 1]",
                self.mixer.sink_gain
            )));
        }
        for (i, source) in self.sources.iter().enumerate() {
            if !(0.0..=1.0).contains(&source.volume) {
                return Err(Error::Config(format!(
                    "source[{}].volume {} outside [0, 1]",
                    i, source.volume
                )));
            }
        }
        Ok(())
    }
}

/// Resolve which configuration file to use, if any
///
/// Returns `None` when neither the CLI, the environment nor the default
/// location names a file.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config file
    default_config_file().filter(|path| path.exists())
}

/// Load configuration following the resolution order, falling back to defaults
///
/// Returns the configuration and the file it came from.
pub fn load_or_default(cli_arg: Option<&Path>) -> Result<(TomlConfig, Option<PathBuf>)> {
    match resolve_config_path(cli_arg) {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            let config = TomlConfig::load(&path)?;
            Ok((config, Some(path)))
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            Ok((TomlConfig::default(), None))
        }
        None => {
            info!("No config file found, using built-in defaults");
            Ok((TomlConfig::default(), None))
        }
    }
}

/// Platform configuration file location
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("submix").join("config.toml"))
}
