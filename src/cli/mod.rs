//! Command-line interface for callscript.
//!
//! Provides commands for inspecting recorded transport captures, replaying
//! them through the call runtime, and reading the diagnostics log.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::adapters::{load_capture, ReplayTransport};
use crate::config::{self, ReplaySettings};
use crate::core::{normalize, CallRuntime, CallSession, CallSnapshot, DiagnosticsLog};
use crate::domain::{CallState, RawEvent, Turn, UserCommand};

/// Assistant id used when neither the command line nor the config names one
const DEFAULT_ASSISTANT: &str = "replay";

/// callscript - Voice call event normalization and transcript reconciliation
#[derive(Parser, Debug)]
#[command(name = "callscript")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the canonical event for each line of a capture
    Normalize {
        /// JSONL capture of raw transport events
        capture: PathBuf,
    },

    /// Reconstruct the transcript of a capture
    Transcript {
        /// JSONL capture of raw transport events
        capture: PathBuf,

        /// Print the final call snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay a capture through the call runtime as a live call
    Simulate {
        /// JSONL capture of raw transport events
        capture: PathBuf,

        /// Delay between replayed events (overrides config)
        #[arg(long)]
        pace_ms: Option<u64>,

        /// Assistant to "call" (or use CALLSCRIPT_ASSISTANT_ID env)
        #[arg(long, env = "CALLSCRIPT_ASSISTANT_ID")]
        assistant: Option<String>,

        /// Give up waiting for the call to end after this many seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Show recently dropped payloads
    Diagnostics {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Normalize { capture } => normalize_capture(&capture).await,
            Commands::Transcript { capture, json } => show_transcript(&capture, json).await,
            Commands::Simulate {
                capture,
                pace_ms,
                assistant,
                timeout_secs,
            } => simulate(&capture, pace_ms, assistant, timeout_secs).await,
            Commands::Diagnostics { limit } => show_diagnostics(limit).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Print one canonical event per raw event, as JSON lines
async fn normalize_capture(path: &Path) -> Result<()> {
    let events = load_capture(path).await?;

    for raw in &events {
        let event = normalize(raw);
        let json = serde_json::to_string(&event).context("Failed to serialize event")?;
        println!("{}", json);
    }

    Ok(())
}

/// Fold a capture through a session synchronously and print the result
async fn show_transcript(path: &Path, json: bool) -> Result<()> {
    let cfg = config::config()?;
    let events = load_capture(path).await?;
    let diagnostics = open_diagnostics(cfg.diagnostics_enabled).await;

    let session = fold_capture(
        &events,
        CallSession::new(cfg.session.connect_error),
        assistant_id(None),
        diagnostics.as_ref(),
    )
    .await?;

    let snapshot = session.snapshot();
    if json {
        let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?;
        println!("{}", json);
        return Ok(());
    }

    print_transcript(&snapshot, cfg.session.drop_empty_final_turns);

    let stats = session.stats();
    eprintln!(
        "\n[{} events, {} dropped, call {}]",
        stats.received,
        stats.dropped,
        snapshot.state
    );

    Ok(())
}

/// Start a call on `session` and ingest every event, logging drops
async fn fold_capture(
    events: &[RawEvent],
    mut session: CallSession,
    assistant_id: String,
    diagnostics: Option<&DiagnosticsLog>,
) -> Result<CallSession> {
    session.command(UserCommand::Start { assistant_id })?;

    for raw in events {
        if let Err(e) = session.ingest(raw) {
            warn!(error = %e, "Dropping event");
            if let Some(log) = diagnostics {
                if let Err(err) = log.record(raw, &e.to_string()).await {
                    warn!(error = %err, "Failed to record diagnostics");
                }
            }
        }
    }

    Ok(session)
}

/// Run a capture through the async runtime and report what a UI would see
async fn simulate(
    path: &Path,
    pace_ms: Option<u64>,
    assistant: Option<String>,
    timeout_secs: u64,
) -> Result<()> {
    let cfg = config::config()?;

    let replay = ReplaySettings {
        pace_ms: pace_ms.unwrap_or(cfg.replay.pace_ms),
        ..cfg.replay.clone()
    };
    let transport = ReplayTransport::open(path, replay).await?;
    eprintln!("Loaded {} events from {}", transport.len(), path.display());

    let diagnostics = open_diagnostics(cfg.diagnostics_enabled).await;

    let (handle, runtime) = CallRuntime::spawn(Arc::new(transport), cfg.session.clone(), diagnostics);

    let mut updates = handle.subscribe();
    handle.start(assistant_id(assistant)).await?;

    let watch = async {
        let mut state = CallState::Idle;
        let mut speaker = None;

        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();

            if snapshot.state != state {
                match &snapshot.last_error {
                    Some(error) => println!("[state] {} -> {} ({})", state, snapshot.state, error),
                    None => println!("[state] {} -> {}", state, snapshot.state),
                }
                state = snapshot.state;
            }
            if snapshot.speaker != speaker {
                match snapshot.speaker {
                    Some(role) => println!("[speaking] {}", role),
                    None => println!("[speaking] -"),
                }
                speaker = snapshot.speaker;
            }

            if call_finished(&snapshot) {
                break;
            }
        }
    };

    if tokio::time::timeout(Duration::from_secs(timeout_secs), watch)
        .await
        .is_err()
    {
        warn!(timeout_secs, "Call did not end in time, hanging up");
    }

    handle.shutdown().await?;
    let snapshot = runtime.await.context("Call runtime panicked")?;

    println!();
    print_transcript(&snapshot, cfg.session.drop_empty_final_turns);

    Ok(())
}

/// The default diagnostics log, if enabled and writable
async fn open_diagnostics(enabled: bool) -> Option<DiagnosticsLog> {
    if !enabled {
        return None;
    }

    match DiagnosticsLog::open_default().await {
        Ok(log) => Some(log),
        Err(e) => {
            warn!(error = %e, "Diagnostics disabled");
            None
        }
    }
}

/// A call is over once it ended, failed, or fell back to idle after connecting
fn call_finished(snapshot: &CallSnapshot) -> bool {
    match snapshot.state {
        CallState::Ended | CallState::Errored => true,
        CallState::Idle => snapshot.call_seq > 0,
        _ => false,
    }
}

/// Show the tail of the diagnostics log
async fn show_diagnostics(limit: usize) -> Result<()> {
    let log = DiagnosticsLog::open_default().await?;
    let records = log.replay().await?;

    if records.is_empty() {
        println!("No dropped events recorded");
        return Ok(());
    }

    println!(
        "{:<20} {:<14} {:<20} {:<17} {}",
        "TIME", "EVENT", "TYPE", "FINGERPRINT", "REASON"
    );
    println!("{}", "-".repeat(96));

    let skip = records.len().saturating_sub(limit);
    for record in records.iter().skip(skip) {
        println!(
            "{:<20} {:<14} {:<20} {:<17} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.event,
            record.message_type.as_deref().unwrap_or("-"),
            record.fingerprint,
            record.reason
        );
        if !record.keys.is_empty() {
            println!("{:<20} keys: {}", "", record.keys.join(", "));
        }
    }

    eprintln!("\n[{} of {} records, {}]", records.len() - skip, records.len(), log.path().display());

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("callscript configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:        {}", cfg.home.display());
    println!("  Diagnostics: {}", config::diagnostics_path()?.display());
    println!();
    println!("Assistant: {}", cfg.assistant_id.as_deref().unwrap_or("(not set)"));
    println!();
    println!("Session:");
    println!("  End grace:          {}ms", cfg.session.end_grace_ms);
    println!("  Connect error:      {:?}", cfg.session.connect_error);
    println!("  Drop empty finals:  {}", cfg.session.drop_empty_final_turns);
    println!();
    println!("Diagnostics enabled: {}", cfg.diagnostics_enabled);
    println!();
    println!("Replay:");
    println!("  Pace:           {}ms", cfg.replay.pace_ms);
    println!("  Hang up at EOF: {}", cfg.replay.hangup_on_eof);

    Ok(())
}

fn assistant_id(explicit: Option<String>) -> String {
    explicit
        .or_else(|| config::config().ok().and_then(|c| c.assistant_id.clone()))
        .unwrap_or_else(|| DEFAULT_ASSISTANT.to_string())
}

fn print_transcript(snapshot: &CallSnapshot, drop_empty_final: bool) {
    let turns = snapshot.visible_turns(drop_empty_final);

    if turns.is_empty() {
        println!("(no transcript)");
        return;
    }

    for turn in turns {
        println!("{}", format_turn(turn));
    }
}

fn format_turn(turn: &Turn) -> String {
    let marker = if turn.is_open() { " ..." } else { "" };
    format!("{:>9}: {}{}", turn.role.as_str(), turn.text, marker)
}
