//! Loopback transport: acknowledges lifecycle requests immediately.
//!
//! No audio, no network. Useful for driving the runtime from tests or from a
//! presentation layer under development.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::RawEvent;

use super::{EventSink, VoiceTransport};

#[derive(Default)]
pub struct LoopbackTransport {
    sink: Mutex<Option<EventSink>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoiceTransport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn start(&self, assistant_id: &str, events: EventSink) -> Result<()> {
        info!(assistant_id, "Loopback call started");
        events.send(RawEvent::signal("call-start")).await?;
        *self.sink.lock().await = Some(events);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(sink) = self.sink.lock().await.take() {
            sink.send(RawEvent::signal("call-end")).await?;
            info!("Loopback call stopped");
        }
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> Result<()> {
        info!(muted, "Loopback mute toggled");
        Ok(())
    }
}
