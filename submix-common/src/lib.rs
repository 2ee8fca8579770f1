//! # Submix Common Library
//!
//! Shared code for the submix workspace:
//! - PCM stream configuration (sample format, rate, channel layout)
//! - Bootstrap TOML configuration and config-file resolution
//! - Logging initialisation
//! - Common error type

pub mod config;
pub mod error;
pub mod logging;
pub mod pcm;

pub use error::{Error, Result};
pub use pcm::{PcmConfig, SampleFormat};
