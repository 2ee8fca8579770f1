//! Capability interfaces a stream owner hands to its input port
//!
//! The mixer never calls back into a stream through raw function pointers;
//! collaborators implement these traits and pass them in at port creation.
//! Callbacks run on the mixing thread (or the controller thread for
//! `on_mixer_exit`) with no mixer lock held, so they may query or control
//! the mixer. Calling `process_tick` from inside a manually driven tick
//! blocks forever.

use super::types::{PortSlot, PortState};
use crate::error::DriftQueryError;

/// Notifications delivered to the owner of an input port
pub trait PortObserver: Send + Sync {
    /// The port moved to `state` (after a write, a control message or a completed fade)
    fn on_state_changed(&self, slot: PortSlot, state: PortState);

    /// Ring buffer space became available; the producer may write again
    fn on_input_available(&self, slot: PortSlot);

    /// The mixing thread stopped; the port will not be drained until it restarts
    fn on_mixer_exit(&self, _slot: PortSlot) {}
}

/// Header of the hwsync frame that contains a given stream offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HwsyncHeader {
    /// Presentation timestamp carried by the frame, in nanoseconds
    pub pts_ns: u64,

    /// Payload bytes that follow the header
    pub payload_size: u32,
}

/// Source of presentation drift for the hwsync-capable (direct) port
pub trait HwsyncMetadataProvider: Send + Sync {
    /// Look up the frame starting at `aligned_offset` bytes into the stream
    ///
    /// Returns the frame header and the signed drift in milliseconds between
    /// where that frame should be presented and where playback actually is.
    /// Positive drift means audio is early (insert silence), negative means it
    /// is late (skip data).
    fn query_drift(&self, aligned_offset: u64) -> Result<(HwsyncHeader, i32), DriftQueryError>;

    /// The direct port started fading out for a pause
    fn on_pause(&self) {}

    /// The direct port started fading back in after a pause
    fn on_resume(&self) {}
}
