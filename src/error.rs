use std::fmt;

use crate::codec::CodecError;
use crate::storage::StorageError;
use crate::sync::ReconcileError;

/// Faults the store recovers from on its own.
///
/// None of these are returned from `read`, `update` or `clear`; the store
/// logs them and keeps the latest one for status displays
/// (`OfflineStore::last_error`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A persisted snapshot could not be read back; the default was used.
    Deserialization { key: String, cause: String },
    /// A value could not be written to durable storage.
    Persist { key: String, cause: String },
    /// The reconciler failed; affected writes stay queued.
    Reconciliation { key: String, cause: String },
}

impl StoreError {
    pub fn key(&self) -> &str {
        match self {
            StoreError::Deserialization { key, .. }
            | StoreError::Persist { key, .. }
            | StoreError::Reconciliation { key, .. } => key,
        }
    }

    pub(crate) fn deserialization(key: &str, cause: impl fmt::Display) -> Self {
        StoreError::Deserialization {
            key: key.to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn persist(key: &str, cause: impl fmt::Display) -> Self {
        StoreError::Persist {
            key: key.to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn reconciliation(key: &str, cause: &ReconcileError) -> Self {
        StoreError::Reconciliation {
            key: key.to_string(),
            cause: cause.to_string(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Deserialization { key, cause } => {
                write!(f, "could not restore {}: {}", key, cause)
            }
            StoreError::Persist { key, cause } => write!(f, "could not persist {}: {}", key, cause),
            StoreError::Reconciliation { key, cause } => {
                write!(f, "could not reconcile {}: {}", key, cause)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Source of a load or save failure before it is tagged with a key.
#[derive(Debug)]
pub(crate) enum SnapshotFault {
    Storage(StorageError),
    Codec(CodecError),
}

impl fmt::Display for SnapshotFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotFault::Storage(err) => write!(f, "{}", err),
            SnapshotFault::Codec(err) => write!(f, "{}", err),
        }
    }
}

impl From<StorageError> for SnapshotFault {
    fn from(err: StorageError) -> Self {
        SnapshotFault::Storage(err)
    }
}

impl From<CodecError> for SnapshotFault {
    fn from(err: CodecError) -> Self {
        SnapshotFault::Codec(err)
    }
}
