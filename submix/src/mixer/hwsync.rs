//! Hardware A/V sync correction for the direct port
//!
//! Presentation drift reported by a [`HwsyncMetadataProvider`] becomes a byte
//! budget: early audio gets silence inserted in place of its data, late audio
//! has staged blocks discarded. An insert budget drains by one staged block
//! per tick; a skip budget discards as many blocks in one tick as it covers.
//!
//! [`HwsyncMetadataProvider`]: super::observer::HwsyncMetadataProvider

use submix_common::PcmConfig;
use tracing::debug;

/// What the tick does with the direct port's staged block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Emit silence for this port; keep the staged block for a later tick
    Insert,

    /// Discard the staged block without mixing it
    Skip,

    /// Mix the staged block normally
    Pass,
}

/// Outstanding insert/skip budgets of one port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HwsyncBudgets {
    pub bytes_to_insert: usize,
    pub bytes_to_skip: usize,
}

impl HwsyncBudgets {
    /// The provider is consulted only once a skip is done and the insert
    /// budget cannot cover the next block
    pub fn needs_query(&self, staged_bytes: usize) -> bool {
        self.bytes_to_skip == 0 && self.bytes_to_insert < staged_bytes
    }

    /// Turn a signed drift into a budget for `config`
    pub fn apply_drift(&mut self, drift_ms: i32, config: &PcmConfig) {
        let bytes = drift_to_bytes(drift_ms, config);
        if drift_ms > 0 {
            self.bytes_to_insert = bytes;
            debug!("hwsync: audio early by {}ms, inserting {} bytes", drift_ms, bytes);
        } else if drift_ms < 0 {
            self.bytes_to_skip = bytes;
            debug!("hwsync: audio late by {}ms, skipping {} bytes", -drift_ms, bytes);
        }
    }

    /// Decide the fate of a staged block and drain the budgets by its size
    pub fn consume(&mut self, staged_bytes: usize) -> Correction {
        if staged_bytes == 0 {
            return Correction::Pass;
        }
        if self.bytes_to_insert >= staged_bytes {
            self.bytes_to_insert -= staged_bytes;
            Correction::Insert
        } else if self.bytes_to_skip > 0 {
            self.bytes_to_skip = self.bytes_to_skip.saturating_sub(staged_bytes);
            Correction::Skip
        } else {
            // a residual smaller than one block is absorbed
            self.bytes_to_insert = 0;
            Correction::Pass
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_idle(&self) -> bool {
        self.bytes_to_insert == 0 && self.bytes_to_skip == 0
    }
}

/// Round a consumed byte count down to a hwsync frame boundary
pub fn aligned_offset(consumed_bytes: u64, hwsync_frame_size: u32) -> u64 {
    if hwsync_frame_size == 0 {
        return consumed_bytes;
    }
    consumed_bytes - consumed_bytes % hwsync_frame_size as u64
}

/// Bytes of `config` PCM covering `|drift_ms|`
pub fn drift_to_bytes(drift_ms: i32, config: &PcmConfig) -> usize {
    let frames = drift_ms.unsigned_abs() as u64 * config.sample_rate as u64 / 1000;
    frames as usize * config.frame_size()
}
