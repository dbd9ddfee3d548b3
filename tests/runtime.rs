//! Call Runtime Integration Tests
//!
//! Drives the async runtime against in-process transports: ordering of
//! forwarded requests, the end-of-call grace timer, start failures and
//! diagnostics for dropped payloads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use callscript::adapters::{EventSink, LoopbackTransport, ReplayTransport, VoiceTransport};
use callscript::config::{ReplaySettings, SessionSettings};
use callscript::core::{CallRuntime, DiagnosticsLog};
use callscript::domain::{CallState, RawEvent, Role};
use serde_json::json;
use tempfile::TempDir;

/// Transport that records every request and acknowledges like a live SDK
#[derive(Default)]
struct RecordingTransport {
    requests: Mutex<Vec<String>>,
    sink: tokio::sync::Mutex<Option<EventSink>>,
    refuse_start: bool,
}

impl RecordingTransport {
    fn refusing() -> Self {
        Self {
            refuse_start: true,
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: String) {
        self.requests.lock().unwrap().push(request);
    }
}

#[async_trait]
impl VoiceTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self, assistant_id: &str, events: EventSink) -> Result<()> {
        self.record(format!("start:{}", assistant_id));
        if self.refuse_start {
            bail!("assistant not found");
        }
        events.send(RawEvent::signal("call-start")).await?;
        *self.sink.lock().await = Some(events);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop".to_string());
        if let Some(sink) = self.sink.lock().await.take() {
            // The runtime may already be gone during shutdown
            let _ = sink.send(RawEvent::signal("call-end")).await;
        }
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> Result<()> {
        self.record(format!("mute:{}", muted));
        Ok(())
    }
}

fn settings() -> SessionSettings {
    SessionSettings::default()
}

#[tokio::test(start_paused = true)]
async fn test_call_returns_to_idle_after_grace_delay() {
    let (handle, runtime) = CallRuntime::spawn(Arc::new(LoopbackTransport::new()), settings(), None);

    handle.start("asst").await.unwrap();
    handle.wait_for(|s| s.state == CallState::Active).await.unwrap();

    handle.end().await.unwrap();
    handle.wait_for(|s| s.state == CallState::Ended).await.unwrap();
    let ended_at = tokio::time::Instant::now();

    handle.wait_for(|s| s.state == CallState::Idle).await.unwrap();
    assert!(ended_at.elapsed() >= Duration::from_millis(2000));

    handle.shutdown().await.unwrap();
    let last = runtime.await.unwrap();
    assert_eq!(last.state, CallState::Idle);
    assert_eq!(last.call_seq, 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_call_cancels_pending_grace_timer() {
    let (handle, runtime) = CallRuntime::spawn(Arc::new(LoopbackTransport::new()), settings(), None);

    handle.start("asst").await.unwrap();
    handle.wait_for(|s| s.state == CallState::Active).await.unwrap();
    handle.end().await.unwrap();
    handle.wait_for(|s| s.state == CallState::Ended).await.unwrap();

    // Start again before the grace delay fires
    handle.start("asst").await.unwrap();
    handle
        .wait_for(|s| s.call_seq == 2 && s.state == CallState::Active)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.snapshot().state, CallState::Active);

    handle.shutdown().await.unwrap();
    runtime.await.unwrap();
}

#[tokio::test]
async fn test_end_in_idle_forwards_nothing() {
    let transport = Arc::new(RecordingTransport::default());
    let (handle, runtime) = CallRuntime::spawn(transport.clone(), settings(), None);

    handle.end().await.unwrap();
    handle.set_muted(true).await.unwrap();
    handle.shutdown().await.unwrap();

    let last = runtime.await.unwrap();
    assert_eq!(last.state, CallState::Idle);
    assert!(!last.muted);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_requests_reach_transport_in_order() {
    let transport = Arc::new(RecordingTransport::default());
    let (handle, runtime) = CallRuntime::spawn(transport.clone(), settings(), None);

    // Issued back to back; stop must not overtake start
    handle.start("asst-1").await.unwrap();
    handle.end().await.unwrap();
    handle.wait_for(|s| s.state == CallState::Ended).await.unwrap();

    handle.shutdown().await.unwrap();
    runtime.await.unwrap();

    assert_eq!(transport.requests(), vec!["start:asst-1", "stop"]);
}

#[tokio::test]
async fn test_mute_is_forwarded_during_a_call() {
    let transport = Arc::new(RecordingTransport::default());
    let (handle, runtime) = CallRuntime::spawn(transport.clone(), settings(), None);

    handle.start("asst").await.unwrap();
    handle.wait_for(|s| s.state == CallState::Active).await.unwrap();
    handle.set_muted(true).await.unwrap();
    handle.wait_for(|s| s.muted).await.unwrap();

    handle.shutdown().await.unwrap();
    runtime.await.unwrap();

    // Shutdown hangs up the live call
    assert_eq!(transport.requests(), vec!["start:asst", "mute:true", "stop"]);
}

#[tokio::test]
async fn test_error_mid_call_stops_transport_before_next_start() {
    let transport = Arc::new(RecordingTransport::default());
    let (handle, runtime) = CallRuntime::spawn(transport.clone(), settings(), None);

    handle.start("a").await.unwrap();
    handle.wait_for(|s| s.state == CallState::Active).await.unwrap();
    handle.push(RawEvent::new("error", json!("transient"))).await.unwrap();
    handle.wait_for(|s| s.state == CallState::Errored).await.unwrap();

    // Rejected in Errored; nothing forwarded for it
    handle.end().await.unwrap();

    handle.start("b").await.unwrap();
    handle
        .wait_for(|s| s.call_seq == 2 && s.state == CallState::Active)
        .await
        .unwrap();
    handle.push(RawEvent::new("error", json!("again"))).await.unwrap();
    handle.shutdown().await.unwrap();

    let last = runtime.await.unwrap();
    assert_eq!(last.state, CallState::Errored);
    assert_eq!(last.last_error.as_deref(), Some("again"));

    // One stop on each failure, one more on shutdown from Errored
    assert_eq!(
        transport.requests(),
        vec!["start:a", "stop", "start:b", "stop", "stop"]
    );
}

#[tokio::test]
async fn test_start_failure_returns_to_idle_with_error() {
    let transport = Arc::new(RecordingTransport::refusing());
    let (handle, runtime) = CallRuntime::spawn(transport.clone(), settings(), None);

    handle.start("missing").await.unwrap();
    let snapshot = handle
        .wait_for(|s| s.call_seq == 1 && s.state == CallState::Idle)
        .await
        .unwrap();

    assert_eq!(snapshot.last_error.as_deref(), Some("assistant not found"));

    handle.shutdown().await.unwrap();
    runtime.await.unwrap();

    // The abandoned attempt is stopped; Idle adds nothing on shutdown
    assert_eq!(transport.requests(), vec!["start:missing", "stop"]);
}

#[tokio::test]
async fn test_pushed_events_build_transcript() {
    let (handle, runtime) = CallRuntime::spawn(Arc::new(LoopbackTransport::new()), settings(), None);

    handle.start("asst").await.unwrap();
    handle.wait_for(|s| s.state == CallState::Active).await.unwrap();

    handle
        .push(RawEvent::message(json!({
            "type": "transcript", "role": "user", "transcriptType": "partial", "transcript": "he",
        })))
        .await
        .unwrap();
    let snapshot = handle.wait_for(|s| s.speaker == Some(Role::User)).await.unwrap();
    assert_eq!(snapshot.turns.len(), 1);

    handle
        .push(RawEvent::message(json!({
            "type": "transcript", "role": "user", "transcriptType": "final", "transcript": "hello",
        })))
        .await
        .unwrap();
    handle.push(RawEvent::new("volume-level", json!(0.25))).await.unwrap();

    let snapshot = handle.wait_for(|s| s.volume.is_some()).await.unwrap();
    assert_eq!(snapshot.turns[0].text, "hello");
    assert!(snapshot.turns[0].is_final);
    assert_eq!(snapshot.speaker, None);

    handle.shutdown().await.unwrap();
    runtime.await.unwrap();
}

#[tokio::test]
async fn test_replayed_capture_runs_to_completion() {
    let events = vec![
        RawEvent::signal("call-start"),
        RawEvent::signal("speech-start"),
        RawEvent::message(json!({"type": "transcript", "role": "assistant", "transcriptType": "partial", "transcript": "Hi"})),
        RawEvent::message(json!({"type": "transcript", "role": "assistant", "transcriptType": "final", "transcript": "Hi there"})),
        RawEvent::message(json!({"type": "transcript", "role": "user", "transcriptType": "partial", "transcript": "I need"})),
    ];
    let transport = ReplayTransport::new(events, ReplaySettings::default());
    let (handle, runtime) = CallRuntime::spawn(Arc::new(transport), settings(), None);

    handle.start("asst").await.unwrap();
    let snapshot = handle.wait_for(|s| s.state == CallState::Ended).await.unwrap();

    // Hang-up at end of capture freezes the user's partial
    let texts: Vec<_> = snapshot.turns.iter().map(|t| (t.text.as_str(), t.is_final)).collect();
    assert_eq!(texts, vec![("Hi there", true), ("I need", true)]);

    handle.shutdown().await.unwrap();
    runtime.await.unwrap();
}

#[tokio::test]
async fn test_dropped_events_are_recorded_without_content() {
    let temp = TempDir::new().unwrap();
    let log = DiagnosticsLog::open(temp.path().join("diagnostics.jsonl")).await.unwrap();
    let (handle, runtime) =
        CallRuntime::spawn(Arc::new(LoopbackTransport::new()), settings(), Some(log.clone()));

    handle
        .push(RawEvent::message(json!({"type": "model-output", "secret": 7})))
        .await
        .unwrap();
    handle.push(RawEvent::signal("call-start")).await.unwrap();
    handle.shutdown().await.unwrap();
    runtime.await.unwrap();

    let records = log.replay().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, "message");
    assert_eq!(records[0].message_type.as_deref(), Some("model-output"));
    assert_eq!(records[0].keys, vec!["secret", "type"]);
}
