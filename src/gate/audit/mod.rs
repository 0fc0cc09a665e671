//! Append-only audit trail.
//!
//! Flow Overview:
//! 1) Callers build an [`AuditRecord`] and call [`AuditLog::append`].
//! 2) The record is queued to a single writer task that owns the sink.
//! 3) The writer persists the record on the blocking pool and only then
//!    acknowledges it, so a slow disk never stalls the async workers.
//!
//! A single writer gives every principal's records a stable chronological
//! order. Write failures are returned to the caller and logged with
//! `alert = true` on the operator channel.

pub mod chain;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error};
use uuid::Uuid;

use super::credentials::Role;

pub use chain::{ChainError, ChainSummary, ChainedFileSink, verify_chain};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("audit write failed: {0}")]
    WriteFailed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failure,
}

/// One immutable audit entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub principal_id: String,
    pub role: Option<Role>,
    pub outcome: Outcome,
    pub token: Option<String>,
    pub detail: Option<String>,
}

impl AuditRecord {
    fn new(principal_id: &str, role: Option<Role>, outcome: Outcome) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            principal_id: principal_id.to_string(),
            role,
            outcome,
            token: None,
            detail: None,
        }
    }

    /// Successful login carrying the issued session token.
    #[must_use]
    pub fn success(principal_id: &str, role: Role, token: &str) -> Self {
        let mut record = Self::new(principal_id, Some(role), Outcome::Success);
        record.token = Some(token.to_string());
        record
    }

    /// Rejected login. `role` is `None` when the principal is unknown.
    #[must_use]
    pub fn failure(principal_id: &str, role: Option<Role>, detail: impl Into<String>) -> Self {
        Self::new(principal_id, role, Outcome::Failure).with_detail(detail)
    }

    /// Sensitive action performed inside an authenticated session.
    #[must_use]
    pub fn action(principal_id: &str, role: Role, detail: impl Into<String>) -> Self {
        Self::new(principal_id, Some(role), Outcome::Success).with_detail(detail)
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Position assigned to a persisted record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    pub seq: u64,
}

/// Durable destination for audit records. Owned by the writer task only.
pub trait AuditSink: Send {
    /// Persist `record` and return its sequence number.
    ///
    /// # Errors
    /// Returns `AuditError::WriteFailed` when the record could not be made durable.
    fn write(&mut self, record: &AuditRecord) -> Result<u64, AuditError>;
}

/// In-memory sink; the shared handle exposes what was written.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemorySink {
    fn write(&mut self, record: &AuditRecord) -> Result<u64, AuditError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push(record.clone());
        Ok(u64::try_from(records.len() - 1).unwrap_or(u64::MAX))
    }
}

struct AppendRequest {
    record: AuditRecord,
    ack: oneshot::Sender<Result<Ack, AuditError>>,
}

/// Cloneable handle to the single audit writer.
#[derive(Clone, Debug)]
pub struct AuditLog {
    tx: mpsc::Sender<AppendRequest>,
}

impl AuditLog {
    /// Spawn the writer task. It stops once every handle has been dropped.
    #[must_use]
    pub fn spawn<S>(sink: S, capacity: usize) -> (Self, JoinHandle<()>)
    where
        S: AuditSink + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_writer(sink, rx));
        (Self { tx }, handle)
    }

    /// Append a record and wait until it is durable.
    ///
    /// # Errors
    /// Returns `AuditError::WriteFailed` if the sink rejected the record or the
    /// writer is gone.
    pub async fn append(&self, record: AuditRecord) -> Result<Ack, AuditError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(AppendRequest {
                record,
                ack: ack_tx,
            })
            .await
            .map_err(|_| AuditError::WriteFailed("audit writer stopped".to_string()))?;

        ack_rx
            .await
            .map_err(|_| AuditError::WriteFailed("audit writer dropped the record".to_string()))?
    }
}

async fn run_writer<S: AuditSink + 'static>(mut sink: S, mut rx: mpsc::Receiver<AppendRequest>) {
    while let Some(AppendRequest { record, ack }) = rx.recv().await {
        let principal = record.principal_id.clone();

        // File sinks fsync every record; keep that off the async workers.
        let written = task::spawn_blocking(move || {
            let result = sink.write(&record).map(|seq| Ack { seq });
            (sink, result)
        })
        .await;

        let result = match written {
            Ok((returned, result)) => {
                sink = returned;
                result
            }
            Err(err) => {
                error!(alert = true, principal = %principal, "audit sink crashed: {err}");
                let _ = ack.send(Err(AuditError::WriteFailed(
                    "audit sink crashed".to_string(),
                )));
                break;
            }
        };

        match &result {
            Ok(done) => debug!(seq = done.seq, principal = %principal, "audit record persisted"),
            Err(err) => error!(
                alert = true,
                principal = %principal,
                "audit record not persisted: {err}"
            ),
        }
        // The caller may have given up waiting; the record is written regardless.
        let _ = ack.send(result);
    }
    debug!("audit writer stopped");
}
