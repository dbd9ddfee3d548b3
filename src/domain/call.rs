//! Call lifecycle vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection phase of the current call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// No call; ready to start one
    Idle,

    /// Start requested, waiting for the transport to acknowledge
    Connecting,

    /// Call is live
    Active,

    /// End requested, waiting for the transport to acknowledge
    Ending,

    /// Call is over; returns to Idle after a grace delay
    Ended,

    /// Transport failure
    Errored,
}

impl CallState {
    /// States from which a new call may be started
    pub fn accepts_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Ended | Self::Errored)
    }

    /// States in which an end request is meaningful
    pub fn accepts_end(&self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }

    /// States in which the transport owns live audio
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Active | Self::Ending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::Ended => "ended",
            Self::Errored => "errored",
        }
    }
}

impl Default for CallState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intent issued by the user through the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum UserCommand {
    /// Start a call with the given assistant
    Start { assistant_id: String },

    /// Hang up
    End,

    /// Mute or unmute the microphone
    SetMuted { muted: bool },
}

impl UserCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::End => "end",
            Self::SetMuted { .. } => "set_muted",
        }
    }
}

/// A state change of the lifecycle machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: CallState,
    pub to: CallState,
}

impl Transition {
    pub fn new(from: CallState, to: CallState) -> Self {
        Self { from, to }
    }

    pub fn entered(&self, state: CallState) -> bool {
        self.to == state && self.from != state
    }

    /// A live call was dropped by a failure rather than a hang-up; the
    /// transport may still hold the session
    pub fn abandons_call(&self) -> bool {
        self.from.is_live() && matches!(self.to, CallState::Errored | CallState::Idle)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
