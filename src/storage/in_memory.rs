use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::store::{KeyValueStore, StorageError};

/// In-memory key-value store backed by `Arc<RwLock<HashMap>>`.
///
/// Clone-friendly (cloning shares the same underlying storage), so two store
/// instances opened on clones behave like two tabs sharing local storage.
#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    storage: Arc<RwLock<HashMap<String, String>>>,
    quota: Option<usize>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total number of bytes (keys plus values) the store accepts.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.storage.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn used_bytes(storage: &HashMap<String, String>, skip: &str) -> usize {
        storage
            .iter()
            .filter(|(k, _)| k.as_str() != skip)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| StorageError::LockPoisoned("kv read"))?;
        Ok(storage.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StorageError::LockPoisoned("kv write"))?;

        if let Some(quota) = self.quota {
            let needed = Self::used_bytes(&storage, key) + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }

        storage.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StorageError::LockPoisoned("kv write"))?;
        Ok(storage.remove(key).is_some())
    }
}
