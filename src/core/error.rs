//! Error taxonomy for the call engine.
//!
//! None of these are fatal. Malformed events are dropped, invalid commands
//! are ignored, and transport errors move the lifecycle.

use thiserror::Error;

use crate::domain::CallState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Inbound payload matched no extraction rule
    #[error("Malformed event '{event}': {reason}")]
    MalformedEvent { event: String, reason: String },

    /// Failure reported by the voice transport
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Command issued in a state that does not accept it
    #[error("Command '{command}' ignored in state {state}")]
    InvalidCommand {
        command: &'static str,
        state: CallState,
    },
}

impl CallError {
    /// Expected races from the UI; callers should not surface these
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::InvalidCommand { .. } | Self::MalformedEvent { .. })
    }
}
