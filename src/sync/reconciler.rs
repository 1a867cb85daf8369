use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::pending::PendingWrite;

/// Writes for one store key handed to the remote system of record.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileBatch<T> {
    pub key: String,
    pub writes: Vec<PendingWrite<T>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Accepted,
    Rejected(String),
}

/// Per-write verdict, matched to the batch by sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub seq: u64,
    pub status: ItemStatus,
}

impl ItemOutcome {
    pub fn accepted(seq: u64) -> Self {
        Self {
            seq,
            status: ItemStatus::Accepted,
        }
    }

    pub fn rejected(seq: u64, reason: impl Into<String>) -> Self {
        Self {
            seq,
            status: ItemStatus::Rejected(reason.into()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == ItemStatus::Accepted
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The remote call failed as a whole.
    Transport(String),
    /// No answer within the configured interval.
    Timeout(Duration),
    /// The reconciler thread went away without answering (it panicked).
    WorkerLost,
    /// The reconciler thread could not be started.
    Spawn(String),
    /// An earlier call, possibly one that timed out, has not returned yet.
    Busy,
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Transport(message) => write!(f, "transport error: {}", message),
            ReconcileError::Timeout(after) => {
                write!(f, "reconciliation timed out after {:?}", after)
            }
            ReconcileError::WorkerLost => write!(f, "reconciler exited without a result"),
            ReconcileError::Spawn(message) => {
                write!(f, "failed to start reconciler thread: {}", message)
            }
            ReconcileError::Busy => write!(f, "previous reconciler call still running"),
        }
    }
}

impl std::error::Error for ReconcileError {}

/// Remote side of the sync: receives buffered writes, reports a verdict for
/// each one.
///
/// Writes without an outcome in the response are treated as rejected and
/// retried. Delivery is at-least-once: a batch that timed out may be sent
/// again even if the remote applied it.
pub trait Reconciler<T>: Send + Sync {
    fn reconcile(&self, batch: &ReconcileBatch<T>) -> Result<Vec<ItemOutcome>, ReconcileError>;
}

impl<T, F> Reconciler<T> for F
where
    F: Fn(&ReconcileBatch<T>) -> Result<Vec<ItemOutcome>, ReconcileError> + Send + Sync,
{
    fn reconcile(&self, batch: &ReconcileBatch<T>) -> Result<Vec<ItemOutcome>, ReconcileError> {
        self(batch)
    }
}

/// Reconciler that accepts every write and logs it.
///
/// With a buffer attached, each write is also recorded as
/// `"<key> #<seq> <json>"`, which doubles as a call log.
#[derive(Clone, Default)]
pub struct LogReconciler {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogReconciler {
    pub fn new() -> Self {
        LogReconciler { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogReconciler {
            buffer: Some(buffer),
        }
    }
}

impl<T: Serialize> Reconciler<T> for LogReconciler {
    fn reconcile(&self, batch: &ReconcileBatch<T>) -> Result<Vec<ItemOutcome>, ReconcileError> {
        let mut outcomes = Vec::with_capacity(batch.writes.len());
        for write in &batch.writes {
            let payload = serde_json::to_string(&write.value)
                .map_err(|e| ReconcileError::Transport(e.to_string()))?;
            let line = format!("{} #{} {}", batch.key, write.seq, payload);
            info!(key = %batch.key, seq = write.seq, "[RECONCILE] {}", payload);
            if let Some(buffer) = &self.buffer {
                let mut buffer = buffer
                    .lock()
                    .map_err(|_| ReconcileError::Transport("log buffer poisoned".into()))?;
                buffer.push(line);
            }
            outcomes.push(ItemOutcome::accepted(write.seq));
        }
        Ok(outcomes)
    }
}
