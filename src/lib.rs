//! callscript - Live voice-call event normalization and transcript reconciliation
//!
//! Sits between a voice-assistant transport (audio, networking, SDK session)
//! and a presentation layer, turning the transport's loosely shaped event
//! stream into a consistent view of the call.
//!
//! # Architecture
//!
//! Every inbound payload passes through one ingestion point:
//! - Raw payloads are normalized into a closed set of canonical events
//! - Canonical events fan out to the call lifecycle, the transcript
//!   reconciler and the speaker activity tracker
//! - Derived state is published as immutable snapshots
//!
//! # Modules
//!
//! - `adapters`: Voice transport trait and implementations (loopback, replay)
//! - `core`: Normalizer, reconciler, lifecycle, session, runtime, diagnostics
//! - `domain`: Data structures (RawEvent, CanonicalEvent, Turn, CallState)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Show canonical events for a capture
//! callscript normalize capture.jsonl
//!
//! # Reconstruct the transcript of a capture
//! callscript transcript capture.jsonl
//!
//! # Replay a capture through the async runtime
//! callscript simulate capture.jsonl --pace-ms 50
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{normalize, CallError, CallHandle, CallRuntime, CallSession, CallSnapshot};
pub use domain::{CallState, CanonicalEvent, Fragment, RawEvent, Role, Turn, UserCommand};
