//! Sink recording the mixed stream to a WAV file
//!
//! The file is created on the first `start`; standby flushes the header so
//! the file is playable at any pause point, and dropping the sink finalises it.

use super::sink::{HardwareTimestamp, PcmSink};
use crate::error::{MixerError, Result};
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use submix_common::{PcmConfig, SampleFormat};
use tracing::{info, warn};

pub struct WavSink {
    path: PathBuf,
    config: PcmConfig,
    writer: Option<WavWriter<BufWriter<File>>>,
    frames_written: u64,
}

impl std::fmt::Debug for WavSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSink")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("open", &self.writer.is_some())
            .field("frames_written", &self.frames_written)
            .finish()
    }
}

impl WavSink {
    /// Prepare a sink writing `config` PCM to `path`
    ///
    /// Only integer 16/32-bit output can be recorded.
    pub fn new(path: impl AsRef<Path>, config: PcmConfig) -> Result<Self> {
        match config.format {
            SampleFormat::S16 | SampleFormat::S32 => {}
            other => {
                return Err(MixerError::UnsupportedConfiguration(format!(
                    "WAV sink cannot record {}",
                    other
                )))
            }
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            config,
            writer: None,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn spec(&self) -> WavSpec {
        WavSpec {
            channels: self.config.channels,
            sample_rate: self.config.sample_rate,
            bits_per_sample: (self.config.format.bytes_per_sample() * 8) as u16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    /// Finalise the file now instead of on drop
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| MixerError::Sink(format!("finalising {}: {}", self.path.display(), e)))?;
            info!(
                "WAV sink finalised {} ({} frames)",
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }
}

impl PcmSink for WavSink {
    fn start(&mut self) -> Result<()> {
        if self.writer.is_none() {
            let writer = WavWriter::create(&self.path, self.spec())
                .map_err(|e| MixerError::Sink(format!("creating {}: {}", self.path.display(), e)))?;
            info!("WAV sink recording to {} ({})", self.path.display(), self.config);
            self.writer = Some(writer);
        }
        Ok(())
    }

    fn standby(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| MixerError::Sink(format!("flushing {}: {}", self.path.display(), e)))?;
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(MixerError::Sink("WAV sink written before start".to_string()));
        };

        let result = match self.config.format {
            SampleFormat::S32 => data
                .chunks_exact(4)
                .try_for_each(|b| writer.write_sample(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            _ => data
                .chunks_exact(2)
                .try_for_each(|b| writer.write_sample(i16::from_le_bytes([b[0], b[1]]))),
        };
        result.map_err(|e| MixerError::Sink(format!("writing {}: {}", self.path.display(), e)))?;

        self.frames_written += self.config.frames_in(data.len()) as u64;
        Ok(data.len())
    }

    fn buffer_frames(&self) -> u64 {
        0
    }

    /// Files present instantly: everything written counts as presented
    fn hardware_timestamp(&self) -> Option<HardwareTimestamp> {
        if self.frames_written == 0 {
            return None;
        }
        Some(HardwareTimestamp {
            avail_frames: 0,
            at: Instant::now(),
        })
    }

    fn name(&self) -> &str {
        "wav"
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!("{}", e);
        }
    }
}
