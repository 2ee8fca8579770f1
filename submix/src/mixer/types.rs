//! Port slots, control messages and the state enums of ports and mixer

use serde::Serialize;
use std::fmt;
use std::ops::BitOr;

/// Number of input slots in the port table
pub const PORT_SLOT_COUNT: usize = 2;

/// Fixed input slot of the port table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortSlot {
    /// Mixed system sounds
    System,

    /// Direct / pass-through stream; the only slot that fades and takes hwsync correction
    Direct,
}

impl PortSlot {
    /// Slots in mixing order
    pub const ALL: [PortSlot; PORT_SLOT_COUNT] = [PortSlot::System, PortSlot::Direct];

    pub const fn index(self) -> usize {
        match self {
            PortSlot::System => 0,
            PortSlot::Direct => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Slot a stream opened with `flags` is routed to
    pub fn from_flags(flags: OutputFlags) -> Self {
        if flags.contains(OutputFlags::DIRECT) || flags.contains(OutputFlags::HW_AV_SYNC) {
            PortSlot::Direct
        } else {
            PortSlot::System
        }
    }

    /// Whether ports in this slot run the PAUSING/RESUMING fade states
    pub const fn fades(self) -> bool {
        matches!(self, PortSlot::Direct)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            PortSlot::System => "system",
            PortSlot::Direct => "direct",
        }
    }
}

impl fmt::Display for PortSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output flags a stream was opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutputFlags(u32);

impl OutputFlags {
    pub const NONE: OutputFlags = OutputFlags(0);
    pub const DIRECT: OutputFlags = OutputFlags(0x1);
    pub const PRIMARY: OutputFlags = OutputFlags(0x2);
    pub const DEEP_BUFFER: OutputFlags = OutputFlags(0x8);
    pub const HW_AV_SYNC: OutputFlags = OutputFlags(0x40);

    pub const fn from_bits(bits: u32) -> Self {
        OutputFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: OutputFlags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for OutputFlags {
    type Output = OutputFlags;

    fn bitor(self, rhs: OutputFlags) -> OutputFlags {
        OutputFlags(self.0 | rhs.0)
    }
}

/// Control message queued on an input port, applied by the mixer thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortMessage {
    Pause,
    Resume,
    Flush,
}

impl fmt::Display for PortMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortMessage::Pause => "PAUSE",
            PortMessage::Resume => "RESUME",
            PortMessage::Flush => "FLUSH",
        };
        f.write_str(name)
    }
}

/// Input port lifecycle state
///
/// ```text
/// CREATED ──write──> ACTIVE ──PAUSE──> PAUSING ──fade done──> PAUSED
///                      ^                                        │
///                      └──fade done── RESUMING <──RESUME────────┘
/// ACTIVE | PAUSED ──FLUSH──> FLUSHING ──reset──> FLUSHED ──write──> ACTIVE
/// ```
///
/// Only the direct slot uses PAUSING/PAUSED/RESUMING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Created,
    Active,
    Pausing,
    Paused,
    Resuming,
    Flushing,
    Flushed,
}

/// Outcome of offering a control message to a port in some state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Apply the message: move to this state
    Enter(PortState),

    /// Port is mid-transition; keep the message queued for the next tick
    Defer,

    /// Message has no meaning in this state; drop it
    Ignore,
}

impl PortState {
    /// States that count as "has data to mix" for the mixer state
    pub const fn is_ready(self) -> bool {
        matches!(
            self,
            PortState::Active | PortState::Pausing | PortState::Resuming
        )
    }

    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            PortState::Pausing | PortState::Resuming | PortState::Flushing
        )
    }

    /// States in which the mixer pulls data from the port
    pub const fn reads_data(self) -> bool {
        self.is_ready()
    }

    /// Transition taken when `msg` is applied in this state
    ///
    /// `fades` selects the full graph (direct slot); other slots only honour FLUSH.
    pub fn on_message(self, msg: PortMessage, fades: bool) -> Transition {
        use PortState::*;

        match (msg, self) {
            (PortMessage::Pause, Active) if fades => Transition::Enter(Pausing),
            (PortMessage::Resume, Paused) if fades => Transition::Enter(Resuming),
            (PortMessage::Pause | PortMessage::Resume, _) if !fades => Transition::Ignore,
            (PortMessage::Flush, Active | Paused) => Transition::Enter(Flushing),
            (_, state) if state.is_transient() => Transition::Defer,
            _ => Transition::Ignore,
        }
    }

    /// A successful write activates a port that is not yet (or no longer) playing
    pub const fn activates_on_write(self) -> bool {
        matches!(self, PortState::Created | PortState::Flushed)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortState::Created => "CREATED",
            PortState::Active => "ACTIVE",
            PortState::Pausing => "PAUSING",
            PortState::Paused => "PAUSED",
            PortState::Resuming => "RESUMING",
            PortState::Flushing => "FLUSHING",
            PortState::Flushed => "FLUSHED",
        };
        f.write_str(name)
    }
}

/// Logical mixer state, recomputed every tick from the port table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MixerState {
    /// No ports exist
    Idle,

    /// Ports exist but none has data
    InportsEnabled,

    /// At least one port is playing
    InportsReady,

    /// Flushing the direct track on request
    DrainTrack,

    /// Flushing every port and the sink on request
    DrainAll,
}

impl MixerState {
    /// The thread may block indefinitely in these states
    pub const fn may_wait(self) -> bool {
        matches!(self, MixerState::Idle | MixerState::InportsEnabled)
    }
}

/// Mixing thread run-state handshake
///
/// Controllers write a `Req*` variant; the thread acknowledges between ticks by
/// moving to the matching settled variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Exited,
    ReqExit,
    Running,
    ReqRun,
    Sleep,
    ReqSleep,
}

impl RunState {
    pub const fn is_request(self) -> bool {
        matches!(self, RunState::ReqExit | RunState::ReqRun | RunState::ReqSleep)
    }
}

/// Explicit drain request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainKind {
    /// Flush the direct (currently playing) track
    Track,

    /// Flush every port and put the sink into standby
    All,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_from_flags() {
        assert_eq!(PortSlot::from_flags(OutputFlags::PRIMARY), PortSlot::System);
        assert_eq!(PortSlot::from_flags(OutputFlags::NONE), PortSlot::System);
        assert_eq!(PortSlot::from_flags(OutputFlags::DIRECT), PortSlot::Direct);
        assert_eq!(
            PortSlot::from_flags(OutputFlags::DIRECT | OutputFlags::HW_AV_SYNC),
            PortSlot::Direct
        );
        assert_eq!(PortSlot::from_flags(OutputFlags::HW_AV_SYNC), PortSlot::Direct);
    }

    #[test]
    fn test_flags_contains_none_is_false() {
        assert!(!OutputFlags::DIRECT.contains(OutputFlags::NONE));
    }

    #[test]
    fn test_fading_graph() {
        use PortState::*;

        assert_eq!(Active.on_message(PortMessage::Pause, true), Transition::Enter(Pausing));
        assert_eq!(Paused.on_message(PortMessage::Resume, true), Transition::Enter(Resuming));
        assert_eq!(Active.on_message(PortMessage::Flush, true), Transition::Enter(Flushing));
        assert_eq!(Paused.on_message(PortMessage::Flush, true), Transition::Enter(Flushing));

        // transient states hold messages back
        assert_eq!(Pausing.on_message(PortMessage::Flush, true), Transition::Defer);
        assert_eq!(Resuming.on_message(PortMessage::Pause, true), Transition::Defer);

        // stable states drop what does not apply
        assert_eq!(Active.on_message(PortMessage::Resume, true), Transition::Ignore);
        assert_eq!(Created.on_message(PortMessage::Flush, true), Transition::Ignore);
        assert_eq!(Flushed.on_message(PortMessage::Pause, true), Transition::Ignore);
    }

    #[test]
    fn test_non_fading_graph_only_flushes() {
        use PortState::*;

        assert_eq!(Active.on_message(PortMessage::Pause, false), Transition::Ignore);
        assert_eq!(Active.on_message(PortMessage::Resume, false), Transition::Ignore);
        assert_eq!(Active.on_message(PortMessage::Flush, false), Transition::Enter(Flushing));
    }

    #[test]
    fn test_ready_states() {
        assert!(PortState::Active.is_ready());
        assert!(PortState::Pausing.is_ready());
        assert!(PortState::Resuming.is_ready());
        assert!(!PortState::Paused.is_ready());
        assert!(!PortState::Created.is_ready());
        assert!(!PortState::Flushed.is_ready());
    }
}
