//! Voice transport interfaces.
//!
//! The transport owns audio, networking and the SDK session. The core only
//! issues fire-and-forget requests through [`VoiceTransport`] and receives
//! the outcome later as inbound events on the [`EventSink`] handed to
//! `start`.

pub mod loopback;
pub mod replay;

use anyhow::Result;
use async_trait::async_trait;

pub use crate::core::runtime::EventSink;
pub use loopback::LoopbackTransport;
pub use replay::{load_capture, ReplayTransport};

/// Trait for voice transport collaborators
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// Start a call with an assistant; events flow into `events`
    async fn start(&self, assistant_id: &str, events: EventSink) -> Result<()>;

    /// Stop the current call. Must be safe to call at any time, any number
    /// of times.
    async fn stop(&self) -> Result<()>;

    /// Mute or unmute the local microphone
    async fn set_muted(&self, muted: bool) -> Result<()>;
}
