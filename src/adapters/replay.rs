//! Replay transport.
//!
//! Plays a JSONL capture of raw transport events back as if it were a live
//! call. Each line is one event in either the wrapped
//! `{"event": "...", "payload": {...}}` form or a bare message object.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ReplaySettings;
use crate::domain::RawEvent;

use super::{EventSink, VoiceTransport};

/// Load a JSONL capture, skipping blank lines
pub async fn load_capture(path: &Path) -> Result<Vec<RawEvent>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read capture: {}", path.display()))?;

    parse_capture(&content).with_context(|| format!("Failed to parse capture: {}", path.display()))
}

fn parse_capture(content: &str) -> Result<Vec<RawEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            RawEvent::from_json_line(line).with_context(|| format!("Line {} is not valid JSON", idx + 1))
        })
        .collect()
}

struct Feed {
    task: JoinHandle<()>,
    sink: EventSink,
}

/// Transport that replays a recorded event stream
pub struct ReplayTransport {
    events: Vec<RawEvent>,
    settings: ReplaySettings,
    feed: Mutex<Option<Feed>>,
    muted: AtomicBool,
}

impl ReplayTransport {
    pub fn new(events: Vec<RawEvent>, settings: ReplaySettings) -> Self {
        Self {
            events,
            settings,
            feed: Mutex::new(None),
            muted: AtomicBool::new(false),
        }
    }

    /// Load a capture file into a new transport
    pub async fn open(path: &Path, settings: ReplaySettings) -> Result<Self> {
        let events = load_capture(path).await?;
        Ok(Self::new(events, settings))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VoiceTransport for ReplayTransport {
    fn name(&self) -> &str {
        "replay"
    }

    async fn start(&self, assistant_id: &str, events: EventSink) -> Result<()> {
        let mut feed = self.feed.lock().await;
        if feed.as_ref().map(|f| !f.task.is_finished()).unwrap_or(false) {
            bail!("Replay already running");
        }

        info!(assistant_id, events = self.events.len(), "Starting replay");

        let queue = self.events.clone();
        let pace = Duration::from_millis(self.settings.pace_ms);
        let hangup_on_eof = self.settings.hangup_on_eof;
        let sink = events.clone();

        let task = tokio::spawn(async move {
            for raw in queue {
                if !pace.is_zero() {
                    tokio::time::sleep(pace).await;
                }
                if sink.send(raw).await.is_err() {
                    debug!("Runtime closed, stopping replay");
                    return;
                }
            }

            if hangup_on_eof {
                let _ = sink.send(RawEvent::signal("call-end")).await;
            }
        });

        *feed = Some(Feed { task, sink: events });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let feed = self.feed.lock().await.take();

        if let Some(feed) = feed {
            feed.task.abort();
            // Acknowledge the hang-up the way a live transport would
            let _ = feed.sink.send(RawEvent::signal("call-end")).await;
            info!("Replay stopped");
        }

        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> Result<()> {
        self.muted.store(muted, Ordering::Relaxed);
        debug!(muted, "Replay mute toggled");
        Ok(())
    }
}
