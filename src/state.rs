//! Controller lifecycle states and their wire signals
//!
//! States alternate between a *requested* (imperative) form and an *achieved*
//! (acknowledgement) form: a parent asks for `Claim`, the child answers with
//! `Claimed`. The declaration order is the lifecycle order, which makes
//! progress monotonic except for the `Resume`/`Suspend` cycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed controller lifecycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum ControllerState {
    #[default]
    NoState,
    Created,
    Connect,
    Connected,
    Resync,
    Resynced,
    Schedule,
    Scheduled,
    Claim,
    Claimed,
    Prepare,
    Prepared,
    Resume,
    Resumed,
    Suspend,
    Suspended,
    Release,
    Released,
    Quit,
    Quited,
    /// Wildcard, never the state of a real controller
    AnyState,
}

/// Requested states a controller may pass through implicitly when a parent
/// skips ahead. `Release` is only synthesized on the way to `Quit`.
const CATCH_UP_STEPS: [ControllerState; 2] = [ControllerState::Claim, ControllerState::Prepare];

/// First signal code; the ordinal of the state is added to it.
const SIGNAL_BASE: u16 = 0x0a00;

impl ControllerState {
    /// Every state in lifecycle order, wildcard last.
    pub const ALL: [ControllerState; 21] = [
        Self::NoState,
        Self::Created,
        Self::Connect,
        Self::Connected,
        Self::Resync,
        Self::Resynced,
        Self::Schedule,
        Self::Scheduled,
        Self::Claim,
        Self::Claimed,
        Self::Prepare,
        Self::Prepared,
        Self::Resume,
        Self::Resumed,
        Self::Suspend,
        Self::Suspended,
        Self::Release,
        Self::Released,
        Self::Quit,
        Self::Quited,
        Self::AnyState,
    ];

    /// Position in the lifecycle.
    #[inline]
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Upper-case name used in logs and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::NoState => "NOSTATE",
            Self::Created => "CREATED",
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Resync => "RESYNC",
            Self::Resynced => "RESYNCED",
            Self::Schedule => "SCHEDULE",
            Self::Scheduled => "SCHEDULED",
            Self::Claim => "CLAIM",
            Self::Claimed => "CLAIMED",
            Self::Prepare => "PREPARE",
            Self::Prepared => "PREPARED",
            Self::Resume => "RESUME",
            Self::Resumed => "RESUMED",
            Self::Suspend => "SUSPEND",
            Self::Suspended => "SUSPENDED",
            Self::Release => "RELEASE",
            Self::Released => "RELEASED",
            Self::Quit => "QUIT",
            Self::Quited => "QUITED",
            Self::AnyState => "ANYSTATE",
        }
    }

    /// True for the imperative half of a transition pair.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::Connect
                | Self::Resync
                | Self::Schedule
                | Self::Claim
                | Self::Prepare
                | Self::Resume
                | Self::Suspend
                | Self::Release
                | Self::Quit
        )
    }

    /// True for the acknowledgement half of a transition pair.
    pub fn is_achieved(self) -> bool {
        self.request_of().is_some()
    }

    /// Maps a requested state onto its acknowledgement, e.g. `Claim -> Claimed`.
    pub fn ack_of(self) -> Option<Self> {
        if self.is_request() {
            Some(Self::ALL[self.ordinal() as usize + 1])
        } else {
            None
        }
    }

    /// Inverse of [`ack_of`](Self::ack_of).
    pub fn request_of(self) -> Option<Self> {
        let ordinal = self.ordinal() as usize;
        if ordinal == 0 {
            return None;
        }
        let request = Self::ALL[ordinal - 1];
        request.is_request().then_some(request)
    }

    /// Wire signal for a state that takes part in a transition pair.
    pub fn signal(self) -> Option<Signal> {
        if self.is_request() || self.is_achieved() {
            Some(Signal(SIGNAL_BASE + u16::from(self.ordinal())))
        } else {
            None
        }
    }

    /// State carried by a wire signal.
    pub fn from_signal(signal: Signal) -> Option<Self> {
        signal.state()
    }

    /// Whether a controller currently in `self` already satisfies `requested`.
    ///
    /// `Suspended` does not satisfy `Resume`; everything else follows the
    /// lifecycle order.
    pub fn has_reached(self, requested: Self) -> bool {
        let Some(ack) = requested.ack_of() else {
            return false;
        };
        if self == Self::AnyState {
            return false;
        }
        match (self, requested) {
            (Self::Suspended, Self::Resume) => false,
            _ => self >= ack,
        }
    }

    /// Requested states to execute, in order, to move from `self` to `target`.
    ///
    /// Intermediate steps are limited to the claim/prepare/release main line:
    /// claim and prepare on the way up, release on the way to quit when
    /// something was claimed. `Resync`, `Schedule`, `Resume` and `Suspend`
    /// are never inserted; a controller reaches them only when asked.
    /// Returns an empty path when `target` is already satisfied and `None`
    /// when `target` is not a request or cannot be reached from here.
    pub fn catch_up_path(self, target: Self) -> Option<Vec<Self>> {
        if !target.is_request() {
            return None;
        }
        if self.has_reached(target) {
            return Some(Vec::new());
        }
        if self < Self::Connected && target != Self::Connect {
            return None;
        }
        if self >= target.ack_of()? && !(self == Self::Suspended && target == Self::Resume) {
            return None;
        }

        let mut path: Vec<Self> = if target < Self::Release {
            CATCH_UP_STEPS
                .iter()
                .copied()
                .filter(|step| *step > self && *step < target && !self.has_reached(*step))
                .collect()
        } else if target == Self::Quit && self >= Self::Claimed && self < Self::Released {
            vec![Self::Release]
        } else {
            Vec::new()
        };
        path.push(target);
        Some(path)
    }

    /// Whether an already queued request makes `new` redundant.
    pub fn supersedes(self, new: Self) -> bool {
        if self == new {
            return true;
        }
        let cycle = |s: Self| matches!(s, Self::Resume | Self::Suspend);
        if cycle(self) && cycle(new) {
            return false;
        }
        self > new
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown controller state '{0}'")]
pub struct UnknownState(pub String);

impl FromStr for ControllerState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Wire code of a lifecycle message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signal(u16);

impl Signal {
    /// Wraps a raw code received from the wire; validity is checked by [`state`](Self::state).
    pub const fn from_code(code: u16) -> Self {
        Self(code)
    }

    pub const fn code(self) -> u16 {
        self.0
    }

    /// The state this signal names, if it is a recognized transition signal.
    pub fn state(self) -> Option<ControllerState> {
        let ordinal = self.0.checked_sub(SIGNAL_BASE)?;
        let state = *ControllerState::ALL.get(usize::from(ordinal))?;
        (state.is_request() || state.is_achieved()).then_some(state)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state() {
            Some(state) => write!(f, "CONTROL_{}", state.name()),
            None => write!(f, "CONTROL_0x{:04x}", self.0),
        }
    }
}
