//! Core call engine.
//!
//! This module contains:
//! - Normalizer: Raw transport payloads to canonical events
//! - Reconciler: Canonical transcript events to ordered turns
//! - Lifecycle: Call state machine and command guards
//! - Activity: Current speaker tracking
//! - Session: Per-call aggregate and single ingestion point
//! - Runtime: Async single-consumer loop, grace timer, transport forwarding
//! - Diagnostics: Append-only log of dropped payloads

pub mod activity;
pub mod diagnostics;
pub mod error;
pub mod lifecycle;
pub mod normalizer;
pub mod reconciler;
pub mod runtime;
pub mod session;

// Re-export commonly used types
pub use activity::SpeakerActivity;
pub use diagnostics::{DiagnosticRecord, DiagnosticsLog, DiagnosticsWriter};
pub use error::CallError;
pub use lifecycle::{CallLifecycle, ConnectErrorPolicy};
pub use normalizer::normalize;
pub use runtime::{CallHandle, CallRuntime, EventSink, Input};
pub use session::{CallSession, CallSnapshot, IngestStats, TransportRequest};
