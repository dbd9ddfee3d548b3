//! Per-call session state.
//!
//! `CallSession` is the single ingestion point: every raw event is normalized
//! once and the canonical event fans out to the lifecycle machine, the
//! reconciler and the activity tracker, each keeping its own state. Entry
//! effects of lifecycle transitions (reset on Connecting, freeze on Ended)
//! are applied here so no component reaches into another's state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{CallState, CanonicalEvent, RawEvent, Role, Transition, Turn, UserCommand};

use super::activity::SpeakerActivity;
use super::error::CallError;
use super::lifecycle::{CallLifecycle, ConnectErrorPolicy};
use super::normalizer::normalize;
use super::reconciler;

/// Request the core forwards to the voice transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "request")]
pub enum TransportRequest {
    Start { assistant_id: String },
    Stop,
    SetMuted { muted: bool },
}

/// Read-only view of the derived state for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    /// Increments each time a new call starts connecting
    pub call_seq: u64,
    pub state: CallState,
    pub turns: Vec<Turn>,
    pub speaker: Option<Role>,
    pub volume: Option<f32>,
    pub muted: bool,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            call_seq: 0,
            state: CallState::Idle,
            turns: Vec::new(),
            speaker: None,
            volume: None,
            muted: false,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

impl CallSnapshot {
    /// Turns for display, optionally without empty finalized turns
    pub fn visible_turns(&self, drop_empty_final: bool) -> Vec<&Turn> {
        reconciler::visible_turns(&self.turns, drop_empty_final)
    }
}

/// Counters for inbound traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub received: u64,
    pub dropped: u64,
}

/// Derived state of the current call
#[derive(Debug, Clone, Default)]
pub struct CallSession {
    lifecycle: CallLifecycle,
    turns: Vec<Turn>,
    activity: SpeakerActivity,
    volume: Option<f32>,
    muted: bool,
    call_seq: u64,
    stats: IngestStats,
}

impl CallSession {
    pub fn new(connect_error: ConnectErrorPolicy) -> Self {
        Self {
            lifecycle: CallLifecycle::new(connect_error),
            ..Default::default()
        }
    }

    pub fn state(&self) -> CallState {
        self.lifecycle.state()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn speaker(&self) -> Option<Role> {
        self.activity.current()
    }

    pub fn volume(&self) -> Option<f32> {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn last_error(&self) -> Option<&str> {
        self.lifecycle.last_error()
    }

    pub fn call_seq(&self) -> u64 {
        self.call_seq
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Normalize and apply one inbound event.
    ///
    /// Returns `Err(MalformedEvent)` when the payload was dropped; the
    /// session is unchanged in that case and the caller only needs to log.
    pub fn ingest(&mut self, raw: &RawEvent) -> Result<Option<Transition>, CallError> {
        self.stats.received += 1;

        match normalize(raw) {
            CanonicalEvent::Unrecognized { reason, .. } => {
                self.stats.dropped += 1;
                Err(CallError::MalformedEvent {
                    event: raw.event.clone(),
                    reason,
                })
            }
            event => Ok(self.apply(&event)),
        }
    }

    /// Apply an already-normalized event
    pub fn apply(&mut self, event: &CanonicalEvent) -> Option<Transition> {
        debug!(kind = event.kind(), state = %self.state(), "Applying event");

        let transition = self.lifecycle.observe(event);
        if let Some(t) = transition {
            self.enter(t);
        }

        // Content is only recorded for a call in progress
        if self.state().is_live() {
            let turns = std::mem::take(&mut self.turns);
            self.turns = reconciler::apply(event, turns);
            self.activity.observe(event);

            if let CanonicalEvent::VolumeSample { level } = event {
                self.volume = Some(*level);
            }
        }

        if let CanonicalEvent::ErrorRaised { message } = event {
            let error = CallError::TransportError(message.clone());
            warn!(%error, state = %self.state(), "Transport reported an error");
        }

        transition
    }

    /// Validate a user command and return what to forward to the transport.
    ///
    /// Rejected commands leave the session untouched and must not be
    /// forwarded.
    pub fn command(&mut self, command: UserCommand) -> Result<TransportRequest, CallError> {
        let transition = self.lifecycle.command(&command).map_err(|e| {
            debug!(error = %e, "Command rejected");
            e
        })?;

        if let Some(t) = transition {
            self.enter(t);
        }

        Ok(match command {
            UserCommand::Start { assistant_id } => TransportRequest::Start { assistant_id },
            UserCommand::End => TransportRequest::Stop,
            UserCommand::SetMuted { muted } => {
                self.muted = muted;
                TransportRequest::SetMuted { muted }
            }
        })
    }

    /// The transport could not start the call
    pub fn start_failed(&mut self, message: &str) -> Option<Transition> {
        let error = CallError::TransportError(message.to_string());
        warn!(%error, "Transport failed to start call");
        let transition = self.lifecycle.start_failed(message);
        if let Some(t) = transition {
            self.enter(t);
        }
        transition
    }

    /// The grace delay scheduled for call `call_seq` fired.
    ///
    /// Stale expirations from an earlier call are ignored.
    pub fn grace_elapsed(&mut self, call_seq: u64) -> Option<Transition> {
        if call_seq != self.call_seq {
            debug!(call_seq, current = self.call_seq, "Ignoring stale grace expiry");
            return None;
        }

        let transition = self.lifecycle.grace_elapsed();
        if let Some(t) = transition {
            self.enter(t);
        }
        transition
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            call_seq: self.call_seq,
            state: self.state(),
            turns: self.turns.clone(),
            speaker: self.speaker(),
            volume: self.volume,
            muted: self.muted,
            last_error: self.last_error().map(str::to_string),
            updated_at: Utc::now(),
        }
    }

    // Entry effects of a transition
    fn enter(&mut self, transition: Transition) {
        info!(%transition, call_seq = self.call_seq, "Call state changed");

        if transition.entered(CallState::Connecting) {
            self.call_seq += 1;
            self.turns.clear();
            self.activity.reset();
            self.volume = None;
            self.muted = false;
        }

        if transition.entered(CallState::Ended) {
            let turns = std::mem::take(&mut self.turns);
            self.turns = reconciler::finalize_open(turns);
            self.activity.reset();
        }
    }
}
