//! Error types for the mixing engine
//!
//! Short transfers are not errors: `write`/`read` report how many bytes moved
//! and the caller retries on its next opportunity.

use crate::mixer::PortSlot;
use thiserror::Error;

/// Main error type for submix
#[derive(Error, Debug)]
pub enum MixerError {
    /// Missing port, out-of-range value or malformed request; nothing was changed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation failed while building a mixer or port
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// No mixing routine (or port normalisation) exists for this configuration
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Presentation position requested before the sink produced a valid timestamp
    #[error("Presentation timestamp not yet valid for {0} port")]
    TimestampUnavailable(PortSlot),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Physical sink failure
    #[error("Sink error: {0}")]
    Sink(String),

    /// Thread spawn or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using MixerError
pub type Result<T> = std::result::Result<T, MixerError>;

/// Failure reported by a hwsync metadata provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriftQueryError {
    /// No header covers the requested offset yet; try again next tick
    #[error("metadata not available yet")]
    Again,

    #[error("metadata provider failed: {0}")]
    Failed(String),
}
