//! Async call runtime.
//!
//! A single consumer task owns the [`CallSession`] and processes every input
//! (raw transport events, user commands, timer expiries) strictly in queue
//! order, so the turn list never needs a lock. Transport requests go to a
//! separate forwarding task that issues them one at a time, so a stop can
//! never overtake the start it follows. Derived state is published through a
//! `watch` channel for the presentation layer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::adapters::VoiceTransport;
use crate::config::SessionSettings;
use crate::domain::{CallState, RawEvent, Transition, UserCommand};

use super::diagnostics::{DiagnosticsLog, DiagnosticsWriter};
use super::session::{CallSession, CallSnapshot, TransportRequest};

const QUEUE_CAPACITY: usize = 256;

/// Everything the runtime consumes
#[derive(Debug, Clone)]
pub enum Input {
    /// Event delivered by the transport
    Raw(RawEvent),

    /// Intent from the user
    Command(UserCommand),

    /// The transport rejected `start` for call `call_seq`
    StartFailed { call_seq: u64, message: String },

    /// The end-of-call grace delay for call `call_seq` fired
    GraceElapsed { call_seq: u64 },

    /// Stop the runtime
    Shutdown,
}

/// Where a transport pushes raw events
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Input>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<Input>) -> Self {
        Self { tx }
    }

    /// Queue one raw event; fails only once the runtime has shut down
    pub async fn send(&self, raw: RawEvent) -> Result<()> {
        self.tx
            .send(Input::Raw(raw))
            .await
            .map_err(|_| anyhow::anyhow!("Call runtime has shut down"))
    }
}

/// Cloneable front door to a running [`CallRuntime`]
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::Sender<Input>,
    snapshots: watch::Receiver<CallSnapshot>,
}

impl CallHandle {
    pub async fn start(&self, assistant_id: impl Into<String>) -> Result<()> {
        self.command(UserCommand::Start {
            assistant_id: assistant_id.into(),
        })
        .await
    }

    pub async fn end(&self) -> Result<()> {
        self.command(UserCommand::End).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        self.command(UserCommand::SetMuted { muted }).await
    }

    pub async fn command(&self, command: UserCommand) -> Result<()> {
        self.send(Input::Command(command)).await
    }

    /// Push a raw transport event, as an integration callback would
    pub async fn push(&self, raw: RawEvent) -> Result<()> {
        self.send(Input::Raw(raw)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Input::Shutdown).await
    }

    /// A sink transports can push into directly
    pub fn sink(&self) -> EventSink {
        EventSink::new(self.tx.clone())
    }

    /// Latest published state
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until the published state satisfies `predicate`
    pub async fn wait_for<F>(&self, predicate: F) -> Result<CallSnapshot>
    where
        F: FnMut(&CallSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .context("Call runtime has shut down")?;
        Ok(snapshot.clone())
    }

    async fn send(&self, input: Input) -> Result<()> {
        self.tx
            .send(input)
            .await
            .map_err(|_| anyhow::anyhow!("Call runtime has shut down"))
    }
}

struct Outbound {
    call_seq: u64,
    request: TransportRequest,
}

/// Single-consumer event loop around a [`CallSession`]
pub struct CallRuntime {
    session: CallSession,
    settings: SessionSettings,
    rx: mpsc::Receiver<Input>,
    tx: mpsc::WeakSender<Input>,
    outbound: mpsc::UnboundedSender<Outbound>,
    forwarder: JoinHandle<()>,
    snapshots: watch::Sender<CallSnapshot>,
    grace_timer: Option<JoinHandle<()>>,
    diagnostics: Option<DiagnosticsWriter>,
}

impl CallRuntime {
    /// Build a runtime and its handle. Call [`CallRuntime::run`] (or use
    /// [`CallRuntime::spawn`]) to start processing.
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        settings: SessionSettings,
        diagnostics: Option<DiagnosticsLog>,
    ) -> (Self, CallHandle) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let session = CallSession::new(settings.connect_error);
        let (snapshots, snapshot_rx) = watch::channel(session.snapshot());

        let forwarder = tokio::spawn(forward_requests(transport, outbound_rx, tx.downgrade()));

        let runtime = Self {
            session,
            settings,
            rx,
            tx: tx.downgrade(),
            outbound,
            forwarder,
            snapshots,
            grace_timer: None,
            diagnostics: diagnostics.map(DiagnosticsLog::spawn_writer),
        };
        let handle = CallHandle {
            tx,
            snapshots: snapshot_rx,
        };

        (runtime, handle)
    }

    /// Build and spawn a runtime; the task resolves to the final snapshot
    pub fn spawn(
        transport: Arc<dyn VoiceTransport>,
        settings: SessionSettings,
        diagnostics: Option<DiagnosticsLog>,
    ) -> (CallHandle, JoinHandle<CallSnapshot>) {
        let (runtime, handle) = Self::new(transport, settings, diagnostics);
        (handle, tokio::spawn(runtime.run()))
    }

    /// Process inputs until shutdown or until every sender is gone
    #[instrument(skip(self), name = "call_runtime")]
    pub async fn run(mut self) -> CallSnapshot {
        info!("Call runtime started");

        while let Some(input) = self.rx.recv().await {
            match input {
                Input::Raw(raw) => self.on_raw(raw),
                Input::Command(command) => self.on_command(command),
                Input::StartFailed { call_seq, message } => {
                    if call_seq == self.session.call_seq() {
                        let transition = self.session.start_failed(&message);
                        self.after(transition);
                    }
                }
                Input::GraceElapsed { call_seq } => {
                    let transition = self.session.grace_elapsed(call_seq);
                    self.after(transition);
                }
                Input::Shutdown => break,
            }
            self.publish();
        }

        self.shutdown().await
    }

    fn on_raw(&mut self, raw: RawEvent) {
        match self.session.ingest(&raw) {
            Ok(transition) => self.after(transition),
            Err(e) => {
                warn!(error = %e, "Dropping event");
                if let Some(writer) = &self.diagnostics {
                    writer.submit(&raw, &e.to_string());
                }
            }
        }
    }

    fn on_command(&mut self, command: UserCommand) {
        match self.session.command(command) {
            Ok(request) => {
                if matches!(request, TransportRequest::Start { .. }) {
                    self.cancel_grace_timer();
                }
                self.forward(request);
            }
            // Double clicks and similar races; nothing to report
            Err(e) => debug!(error = %e, "Command ignored"),
        }
    }

    fn after(&mut self, transition: Option<Transition>) {
        let Some(t) = transition else {
            return;
        };

        if t.abandons_call() {
            // Release the transport session before any new start
            self.forward(TransportRequest::Stop);
        }
        if t.entered(CallState::Ended) {
            self.schedule_grace_timer();
        }
    }

    fn forward(&self, request: TransportRequest) {
        let outbound = Outbound {
            call_seq: self.session.call_seq(),
            request,
        };
        if self.outbound.send(outbound).is_err() {
            warn!("Transport forwarder has stopped");
        }
    }

    fn schedule_grace_timer(&mut self) {
        self.cancel_grace_timer();

        let call_seq = self.session.call_seq();
        let delay = Duration::from_millis(self.settings.end_grace_ms);
        let tx = self.tx.clone();

        debug!(call_seq, delay_ms = self.settings.end_grace_ms, "Scheduling return to idle");
        self.grace_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Input::GraceElapsed { call_seq }).await;
            }
        }));
    }

    fn cancel_grace_timer(&mut self) {
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }

    async fn shutdown(mut self) -> CallSnapshot {
        self.cancel_grace_timer();

        let state = self.session.state();
        if state.is_live() || state == CallState::Errored {
            self.forward(TransportRequest::Stop);
        }

        // Nothing is consumed past this point; late transport sends must fail
        // fast instead of waiting on a full queue
        drop(self.rx);

        // Let queued requests (including the stop) reach the transport
        drop(self.outbound);
        if let Err(e) = self.forwarder.await {
            warn!(error = %e, "Transport forwarder panicked");
        }
        if let Some(writer) = self.diagnostics {
            writer.close().await;
        }

        info!(state = %self.session.state(), "Call runtime stopped");
        self.session.snapshot()
    }
}

/// Issue transport requests in order, one at a time
async fn forward_requests(
    transport: Arc<dyn VoiceTransport>,
    mut requests: mpsc::UnboundedReceiver<Outbound>,
    inputs: mpsc::WeakSender<Input>,
) {
    while let Some(Outbound { call_seq, request }) = requests.recv().await {
        debug!(transport = transport.name(), ?request, "Forwarding request");

        match request {
            TransportRequest::Start { assistant_id } => {
                let Some(tx) = inputs.upgrade() else {
                    break;
                };
                if let Err(e) = transport.start(&assistant_id, EventSink::new(tx.clone())).await {
                    let _ = tx
                        .send(Input::StartFailed {
                            call_seq,
                            message: e.to_string(),
                        })
                        .await;
                }
            }
            TransportRequest::Stop => {
                if let Err(e) = transport.stop().await {
                    warn!(error = %e, "Transport stop failed");
                }
            }
            TransportRequest::SetMuted { muted } => {
                if let Err(e) = transport.set_muted(muted).await {
                    warn!(error = %e, muted, "Transport mute failed");
                }
            }
        }
    }
}
