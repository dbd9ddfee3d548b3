//! Event normalization.
//!
//! Maps transport payloads onto [`CanonicalEvent`]. The same fact can arrive
//! under different discriminators, field names and wrapper keys, so each
//! discriminator has an ordered set of extraction rules, and every rule falls
//! back to a generic scan over fixed priority lists. Nothing here can fail:
//! a payload no rule understands becomes `Unrecognized`.

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{CanonicalEvent, Fragment, RawEvent, Role};

type Object = Map<String, Value>;

/// Candidate fields for utterance text, highest priority first
pub const TEXT_FIELDS: &[&str] = &["transcript", "text", "content", "inputText", "input", "message"];

/// Wrapper objects that may nest the text, role or finality fields
pub const WRAPPER_KEYS: &[&str] = &["transcript", "status", "message", "data"];

/// Explicit finality flags
const FINAL_FLAGS: &[&str] = &["final", "isFinal"];

/// String fields that carry a finality marker
const FINALITY_FIELDS: &[&str] = &["transcriptType", "status"];

/// Markers that make a fragment partial; anything else is final
const PARTIAL_MARKERS: &[&str] = &["partial", "interim", "started"];

/// Arrays of prior turns in a conversation update
const HISTORY_FIELDS: &[&str] = &["conversation", "messages"];

/// Normalize one inbound event.
pub fn normalize(raw: &RawEvent) -> CanonicalEvent {
    let event = match signal_name(&raw.event).as_str() {
        "call-start" | "call-started" => CanonicalEvent::CallStarted,
        "call-end" | "call-ended" => CanonicalEvent::CallEnded,
        "speech-start" | "speech-started" => CanonicalEvent::SpeechStarted {
            role: signal_role(&raw.payload),
        },
        "speech-end" | "speech-ended" => CanonicalEvent::SpeechEnded {
            role: signal_role(&raw.payload),
        },
        "volume-level" | "volume" => match volume_level(&raw.payload) {
            Some(level) => CanonicalEvent::VolumeSample { level },
            None => CanonicalEvent::unrecognized(raw, "volume sample is not a finite number"),
        },
        "error" => CanonicalEvent::ErrorRaised {
            message: error_message(&raw.payload),
        },
        "message" => normalize_message(raw),
        other => CanonicalEvent::unrecognized(raw, format!("unknown signal '{}'", other)),
    };

    if let CanonicalEvent::Unrecognized { reason, .. } = &event {
        debug!(signal = %raw.event, message_type = ?raw.message_type(), %reason, "Unrecognized event");
    }

    event
}

fn signal_name(event: &str) -> String {
    event.trim().to_ascii_lowercase().replace('_', "-")
}

fn normalize_message(raw: &RawEvent) -> CanonicalEvent {
    let obj = match raw.payload.as_object() {
        Some(obj) => obj,
        None => return CanonicalEvent::unrecognized(raw, "message payload is not an object"),
    };

    let discriminated = match obj.get("type").and_then(Value::as_str) {
        Some("transcript") => extract_fragment(obj, None),
        Some("voice-input") => extract_fragment(obj, Some(Role::User)),
        Some("conversation-update") => conversation_update(obj),
        Some("speech-update") => speech_update(obj),
        Some("status-update") => status_update(obj),
        _ => None,
    };

    discriminated
        .or_else(|| extract_fragment(obj, None))
        .unwrap_or_else(|| CanonicalEvent::unrecognized(raw, "no role or text could be extracted"))
}

/// Generic scan: role and text from the priority lists, finality by the
/// default-to-final rule.
fn extract_fragment(obj: &Object, default_role: Option<Role>) -> Option<CanonicalEvent> {
    let role = find_role(obj).or(default_role)?;
    let text = find_text(obj)?;
    Some(CanonicalEvent::fragment(role, text, finality(obj)))
}

fn conversation_update(obj: &Object) -> Option<CanonicalEvent> {
    let items = HISTORY_FIELDS
        .iter()
        .find_map(|field| obj.get(*field).and_then(Value::as_array))?;

    let fragments = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|entry| {
            // Entries without a speaker role (system prompts, tool calls) are skipped
            let role = entry.get("role").and_then(Value::as_str).and_then(Role::parse)?;
            let text = find_text(entry)?;
            Some(Fragment::finished(role, text))
        })
        .collect();

    Some(CanonicalEvent::TranscriptReplay { fragments })
}

fn speech_update(obj: &Object) -> Option<CanonicalEvent> {
    let status = obj.get("status").and_then(Value::as_str)?;
    let role = find_role(obj).unwrap_or(Role::Assistant);

    match status.to_ascii_lowercase().as_str() {
        "started" | "start" => Some(CanonicalEvent::SpeechStarted { role }),
        "stopped" | "stop" | "ended" => Some(CanonicalEvent::SpeechEnded { role }),
        _ => None,
    }
}

fn status_update(obj: &Object) -> Option<CanonicalEvent> {
    if let Some(fragment) = extract_fragment(obj, None) {
        return Some(fragment);
    }

    match obj.get("status").and_then(Value::as_str)? {
        "in-progress" => Some(CanonicalEvent::CallStarted),
        "ended" => Some(CanonicalEvent::CallEnded),
        _ => None,
    }
}

/// First string-valued text field, looking one wrapper level deep
fn find_text(obj: &Object) -> Option<String> {
    if let Some(text) = text_field(obj) {
        return Some(text);
    }

    WRAPPER_KEYS
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_object))
        .find_map(text_field)
}

fn text_field(obj: &Object) -> Option<String> {
    TEXT_FIELDS
        .iter()
        .find_map(|field| obj.get(*field).and_then(Value::as_str))
        .map(str::to_string)
}

/// Explicit `role` (top level, then wrappers), else presence flags
fn find_role(obj: &Object) -> Option<Role> {
    let explicit = std::iter::once(obj)
        .chain(
            WRAPPER_KEYS
                .iter()
                .filter_map(|key| obj.get(*key).and_then(Value::as_object)),
        )
        .find_map(|o| o.get("role").and_then(Value::as_str).and_then(Role::parse));

    if explicit.is_some() {
        return explicit;
    }

    let user = obj.get("user").map(is_truthy).unwrap_or(false);
    let assistant = obj.get("assistant").map(is_truthy).unwrap_or(false);

    match (user, assistant) {
        (true, false) => Some(Role::User),
        (false, true) => Some(Role::Assistant),
        // Both or neither: ambiguous
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Finality: explicit flag, else marker vocabulary, else final.
///
/// Only an explicit partial marker makes a fragment partial, so a malformed
/// marker cannot swallow a final utterance.
fn finality(obj: &Object) -> bool {
    let scopes = || {
        std::iter::once(obj).chain(
            WRAPPER_KEYS
                .iter()
                .filter_map(|key| obj.get(*key).and_then(Value::as_object)),
        )
    };

    if let Some(flag) = scopes().find_map(|o| FINAL_FLAGS.iter().find_map(|f| o.get(*f).and_then(as_flag))) {
        return flag;
    }

    let marker = scopes().find_map(|o| {
        FINALITY_FIELDS
            .iter()
            .find_map(|f| o.get(*f).and_then(Value::as_str))
    });

    match marker {
        Some(marker) => !PARTIAL_MARKERS
            .iter()
            .any(|partial| marker.trim().eq_ignore_ascii_case(partial)),
        None => true,
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Role of a bare speech signal; the SDK's bare signals describe the assistant
fn signal_role(payload: &Value) -> Role {
    match payload {
        Value::Object(obj) => find_role(obj),
        Value::String(s) => Role::parse(s),
        _ => None,
    }
    .unwrap_or(Role::Assistant)
}

fn volume_level(payload: &Value) -> Option<f32> {
    let level = match payload {
        Value::Number(n) => n.as_f64(),
        Value::Object(obj) => ["level", "volume"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_f64)),
        _ => None,
    }?;

    if !level.is_finite() {
        return None;
    }
    Some(level.clamp(0.0, 1.0) as f32)
}

fn error_message(payload: &Value) -> String {
    let message = match payload {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| obj.get("error").and_then(Value::as_str))
            .or_else(|| {
                obj.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
            })
            .or_else(|| obj.get("errorMsg").and_then(Value::as_str))
            .map(str::to_string)
            .or_else(|| Some(payload.to_string())),
        Value::Null => None,
        other => Some(other.to_string()),
    };

    message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| "unknown transport error".to_string())
}
