//! Append-only diagnostics log for dropped transport events.
//!
//! Records are stored as newline-delimited JSON (JSONL) for easy
//! inspection. A record describes the shape of a payload (signal, message
//! type, top-level keys, fingerprint) but never its content, so utterance
//! text does not leak into the log.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::domain::RawEvent;

/// One dropped payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub id: Uuid,

    /// When the payload was dropped
    pub timestamp: DateTime<Utc>,

    /// Transport signal name
    pub event: String,

    /// `type` discriminator of message payloads
    pub message_type: Option<String>,

    /// Top-level payload keys, sorted
    pub keys: Vec<String>,

    /// First 16 hex chars of the SHA-256 of the compact payload JSON
    pub fingerprint: String,

    /// Why no rule matched
    pub reason: String,
}

impl DiagnosticRecord {
    pub fn from_raw(raw: &RawEvent, reason: impl Into<String>) -> Self {
        let mut keys: Vec<String> = raw
            .payload
            .as_object()
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event: raw.event.clone(),
            message_type: raw.message_type().map(str::to_string),
            keys,
            fingerprint: fingerprint(&raw.payload),
            reason: reason.into(),
        }
    }
}

/// File-based diagnostics sink using JSONL format
#[derive(Debug, Clone)]
pub struct DiagnosticsLog {
    path: PathBuf,
}

impl DiagnosticsLog {
    /// Open (creating parent directories) a log at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create diagnostics directory: {}", parent.display()))?;
        }

        Ok(Self { path })
    }

    /// Open the log at `$CALLSCRIPT_HOME/diagnostics.jsonl`
    pub async fn open_default() -> Result<Self> {
        Self::open(crate::config::diagnostics_path()?).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Describe and append a dropped payload
    pub async fn record(&self, raw: &RawEvent, reason: &str) -> Result<DiagnosticRecord> {
        let record = DiagnosticRecord::from_raw(raw, reason);
        self.append(&record).await?;
        Ok(record)
    }

    /// Append a record to the log
    pub async fn append(&self, record: &DiagnosticRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open diagnostics file: {}", self.path.display()))?;

        let json = serde_json::to_string(record).context("Failed to serialize diagnostic record")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write diagnostic record")?;
        file.flush().await.context("Failed to flush diagnostic record")?;

        Ok(())
    }

    /// Read all records in order
    pub async fn replay(&self) -> Result<Vec<DiagnosticRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open diagnostics file: {}", self.path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: DiagnosticRecord = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse diagnostic record: {}", line))?;
            records.push(record);
        }

        Ok(records)
    }

    /// Move appends onto a background task so callers never wait on disk
    pub fn spawn_writer(self) -> DiagnosticsWriter {
        let (tx, mut rx) = mpsc::unbounded_channel::<DiagnosticRecord>();

        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = self.append(&record).await {
                    warn!(error = %e, "Failed to record diagnostics");
                }
            }
        });

        DiagnosticsWriter { tx, task }
    }
}

/// Handle to a background diagnostics writer
#[derive(Debug)]
pub struct DiagnosticsWriter {
    tx: mpsc::UnboundedSender<DiagnosticRecord>,
    task: JoinHandle<()>,
}

impl DiagnosticsWriter {
    /// Describe a dropped payload and queue it for writing
    pub fn submit(&self, raw: &RawEvent, reason: &str) {
        if self.tx.send(DiagnosticRecord::from_raw(raw, reason)).is_err() {
            warn!("Diagnostics writer has stopped");
        }
    }

    /// Flush queued records and stop the writer
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Diagnostics writer panicked");
        }
    }
}

/// Stable fingerprint of a payload (first 16 hex chars of SHA-256)
pub fn fingerprint(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
