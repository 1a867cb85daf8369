use std::fmt;

/// Error type for key-value storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The underlying lock was poisoned (e.g. a thread panicked while holding it).
    LockPoisoned(&'static str),
    /// Writing the value would exceed the storage quota.
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },
    /// The backing medium failed (file system, browser storage, ...).
    Io(String),
    /// Any other storage error.
    Other(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::LockPoisoned(operation) => {
                write!(f, "storage lock poisoned during {}", operation)
            }
            StorageError::QuotaExceeded { key, needed, quota } => write!(
                f,
                "storage quota exceeded writing {} ({} bytes needed, quota {})",
                key, needed, quota
            ),
            StorageError::Io(message) => write!(f, "storage i/o error: {}", message),
            StorageError::Other(message) => write!(f, "storage error: {}", message),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Durable string key-value storage. One value per key (latest wins).
///
/// Browser local storage, a directory of files, or an embedded database can
/// all sit behind this trait. Callers treat every error as recoverable.
pub trait KeyValueStore: Send + Sync {
    /// Load the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Save (or overwrite) the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete the value stored under `key`. Returns true if one existed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        (**self).remove(key)
    }
}
