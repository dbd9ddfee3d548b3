//! Inbound and canonical event types.
//!
//! The voice transport delivers loosely-shaped [`RawEvent`]s. The normalizer
//! turns each one into a [`CanonicalEvent`] from a closed vocabulary that the
//! rest of the crate consumes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speaker of a turn or speech signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human on the call
    User,

    /// The AI assistant
    Assistant,
}

impl Role {
    /// Parse a role from the vocabularies transports use.
    ///
    /// Returns `None` for non-speaker roles such as `system` or `tool`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" | "customer" | "human" => Some(Self::User),
            "assistant" | "bot" | "agent" | "ai" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_event_name() -> String {
    "message".to_string()
}

/// An event exactly as the transport delivered it.
///
/// Captures are stored as one JSON object per line. A line without an
/// `event` key is read as a `message` whose payload is the whole object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Signal name (`call-start`, `message`, `volume-level`, ...)
    #[serde(default = "default_event_name")]
    pub event: String,

    /// Signal payload; `Null` for bare signals
    #[serde(default)]
    pub payload: Value,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// A bare signal with no payload
    pub fn signal(event: impl Into<String>) -> Self {
        Self::new(event, Value::Null)
    }

    /// A `message` signal carrying `payload`
    pub fn message(payload: Value) -> Self {
        Self::new("message", payload)
    }

    /// Build from any JSON value, accepting both the wrapped
    /// `{"event": .., "payload": ..}` form and a bare message object.
    pub fn from_value(value: Value) -> Self {
        if let Value::Object(ref map) = value {
            if let Some(Value::String(event)) = map.get("event") {
                let payload = map.get("payload").cloned().unwrap_or(Value::Null);
                return Self::new(event.clone(), payload);
            }
        }
        Self::message(value)
    }

    /// Parse one line of a JSONL capture
    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<Value>(line).map(Self::from_value)
    }

    /// The `type` discriminator of a message payload, if any
    pub fn message_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }
}

/// One unit of transcript content.
///
/// Text is cumulative for its turn: each fragment carries the utterance so
/// far, not a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub role: Role,
    pub text: String,
    pub is_final: bool,
}

impl Fragment {
    pub fn new(role: Role, text: impl Into<String>, is_final: bool) -> Self {
        Self {
            role,
            text: text.into(),
            is_final,
        }
    }

    pub fn partial(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, text, false)
    }

    pub fn finished(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, text, true)
    }
}

/// Closed vocabulary of normalized call events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CanonicalEvent {
    /// Transport acknowledged the call is live
    CallStarted,

    /// Transport reports the call is over
    CallEnded,

    /// A party started producing audio
    SpeechStarted { role: Role },

    /// A party stopped producing audio
    SpeechEnded { role: Role },

    /// Output volume, clamped to 0..=1
    VolumeSample { level: f32 },

    /// Incremental transcript content for a single turn
    TranscriptFragment(Fragment),

    /// History replayed by the transport, oldest first, all final
    TranscriptReplay { fragments: Vec<Fragment> },

    /// Transport-level failure
    ErrorRaised { message: String },

    /// Payload no rule could classify
    Unrecognized { raw: RawEvent, reason: String },
}

impl CanonicalEvent {
    pub fn fragment(role: Role, text: impl Into<String>, is_final: bool) -> Self {
        Self::TranscriptFragment(Fragment::new(role, text, is_final))
    }

    pub fn unrecognized(raw: &RawEvent, reason: impl Into<String>) -> Self {
        Self::Unrecognized {
            raw: raw.clone(),
            reason: reason.into(),
        }
    }

    pub fn is_unrecognized(&self) -> bool {
        matches!(self, Self::Unrecognized { .. })
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CallStarted => "call_started",
            Self::CallEnded => "call_ended",
            Self::SpeechStarted { .. } => "speech_started",
            Self::SpeechEnded { .. } => "speech_ended",
            Self::VolumeSample { .. } => "volume_sample",
            Self::TranscriptFragment(_) => "transcript_fragment",
            Self::TranscriptReplay { .. } => "transcript_replay",
            Self::ErrorRaised { .. } => "error_raised",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_parse_vocabulary() {
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse(" Customer "), Some(Role::User));
        assert_eq!(Role::parse("BOT"), Some(Role::Assistant));
        assert_eq!(Role::parse("assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
        assert_eq!(Role::parse("tool"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn test_raw_event_wrapped_form() {
        let raw = RawEvent::from_json_line(r#"{"event":"call-start"}"#).unwrap();
        assert_eq!(raw.event, "call-start");
        assert_eq!(raw.payload, Value::Null);
    }

    #[test]
    fn test_raw_event_bare_message_form() {
        let raw = RawEvent::from_json_line(
            r#"{"type":"transcript","role":"user","transcript":"hi"}"#,
        )
        .unwrap();
        assert_eq!(raw.event, "message");
        assert_eq!(raw.message_type(), Some("transcript"));
    }

    #[test]
    fn test_raw_event_serde_defaults() {
        let raw: RawEvent = serde_json::from_value(json!({"payload": {"type": "x"}})).unwrap();
        assert_eq!(raw.event, "message");
    }

    #[test]
    fn test_canonical_event_serialization() {
        let event = CanonicalEvent::fragment(Role::User, "hello", true);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "transcript_fragment");
        assert_eq!(json["role"], "user");
        assert_eq!(json["is_final"], true);

        let parsed: CanonicalEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }
}
