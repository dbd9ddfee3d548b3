//! Call lifecycle state machine.
//!
//! Transitions:
//! - Idle --(start)--> Connecting
//! - Connecting --(CallStarted)--> Active
//! - Connecting --(ErrorRaised | start failure)--> Idle or Errored (policy)
//! - Connecting | Active --(end)--> Ending
//! - Active | Ending --(CallEnded)--> Ended
//! - Ended --(grace delay)--> Idle
//! - Connecting | Active | Ending | Errored --(ErrorRaised)--> Errored
//!
//! Idle and Ended ignore late errors. Everything else is a no-op. Commands in
//! the wrong state are rejected with [`CallError::InvalidCommand`], which
//! callers treat as a benign race.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CallState, CanonicalEvent, Transition, UserCommand};

use super::error::CallError;

/// Where a failed connection attempt lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectErrorPolicy {
    /// Back to Idle; the error stays visible in the error slot
    Idle,

    /// Errored, same as a failure during a live call
    Errored,
}

impl Default for ConnectErrorPolicy {
    fn default() -> Self {
        Self::Idle
    }
}

impl ConnectErrorPolicy {
    fn target(&self) -> CallState {
        match self {
            Self::Idle => CallState::Idle,
            Self::Errored => CallState::Errored,
        }
    }
}

/// Owns the current lifecycle state and the user-visible error slot
#[derive(Debug, Clone, Default)]
pub struct CallLifecycle {
    state: CallState,
    last_error: Option<String>,
    connect_error: ConnectErrorPolicy,
}

impl CallLifecycle {
    pub fn new(connect_error: ConnectErrorPolicy) -> Self {
        Self {
            state: CallState::Idle,
            last_error: None,
            connect_error,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Last transport error, cleared by the next successful transition
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Validate a user command against the current state.
    ///
    /// `Ok(None)` means the command is accepted without a state change
    /// (mute toggles).
    pub fn command(&mut self, command: &UserCommand) -> Result<Option<Transition>, CallError> {
        let accepted = match command {
            UserCommand::Start { .. } => self.state.accepts_start(),
            UserCommand::End => self.state.accepts_end(),
            UserCommand::SetMuted { .. } => {
                matches!(self.state, CallState::Connecting | CallState::Active)
            }
        };

        if !accepted {
            return Err(CallError::InvalidCommand {
                command: command.name(),
                state: self.state,
            });
        }

        Ok(match command {
            UserCommand::Start { .. } => Some(self.transition(CallState::Connecting)),
            UserCommand::End => Some(self.transition(CallState::Ending)),
            UserCommand::SetMuted { .. } => None,
        })
    }

    /// Fold one canonical event into the lifecycle
    pub fn observe(&mut self, event: &CanonicalEvent) -> Option<Transition> {
        match (self.state, event) {
            (CallState::Connecting, CanonicalEvent::CallStarted) => {
                Some(self.transition(CallState::Active))
            }
            (CallState::Active | CallState::Ending, CanonicalEvent::CallEnded) => {
                Some(self.transition(CallState::Ended))
            }
            (CallState::Idle | CallState::Ended, CanonicalEvent::ErrorRaised { message }) => {
                debug!(state = %self.state, %message, "Ignoring late transport error");
                None
            }
            (CallState::Connecting, CanonicalEvent::ErrorRaised { message }) => {
                self.fail(message, self.connect_error.target())
            }
            (_, CanonicalEvent::ErrorRaised { message }) => self.fail(message, CallState::Errored),
            _ => None,
        }
    }

    /// The transport rejected a start request
    pub fn start_failed(&mut self, message: &str) -> Option<Transition> {
        match self.state {
            CallState::Connecting => self.fail(message, self.connect_error.target()),
            // Ended before it ever started; no CallEnded will follow
            CallState::Ending => Some(self.transition(CallState::Ended)),
            _ => None,
        }
    }

    /// The end-of-call grace delay fired
    pub fn grace_elapsed(&mut self) -> Option<Transition> {
        match self.state {
            CallState::Ended => Some(self.transition(CallState::Idle)),
            _ => None,
        }
    }

    fn fail(&mut self, message: &str, to: CallState) -> Option<Transition> {
        let from = self.state;
        self.state = to;
        self.last_error = Some(message.to_string());

        if from == to {
            None
        } else {
            Some(Transition::new(from, to))
        }
    }

    fn transition(&mut self, to: CallState) -> Transition {
        let from = self.state;
        self.state = to;
        self.last_error = None;
        Transition::new(from, to)
    }
}
