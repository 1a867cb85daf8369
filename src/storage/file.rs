use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use super::store::{KeyValueStore, StorageError};

const EXTENSION: &str = "kv";

/// Directory-backed key-value store. Values survive process restarts.
///
/// Each key maps to one file whose name is the URL-safe base64 encoding of
/// the key, so arbitrary keys never escape the directory. Writes go to a
/// temporary sibling first and are renamed into place.
#[derive(Clone, Debug)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = URL_SAFE_NO_PAD.encode(key.as_bytes());
        self.dir.join(format!("{}.{}", name, EXTENSION))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileKeyValueStore::open(dir.path()).unwrap();
            store.set("draft", "hello").unwrap();
        }

        let reopened = FileKeyValueStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("draft").unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn keys_with_separators_stay_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyValueStore::open(dir.path()).unwrap();
        store.set("../escape/attempt", "v").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            store.get("../escape/attempt").unwrap().as_deref(),
            Some("v")
        );
    }

    #[test]
    fn remove_missing_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyValueStore::open(dir.path()).unwrap();
        assert!(!store.remove("missing").unwrap());
        store.set("k", "v").unwrap();
        assert!(store.remove("k").unwrap());
        assert!(store.get("k").unwrap().is_none());
    }
}
