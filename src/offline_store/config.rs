use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::SnapshotFormat;

/// Suffix appended to the store key for the durable copy of the queue.
pub const QUEUE_KEY_SUFFIX: &str = ".pending-sync";

/// Store configuration.
///
/// Serializable so hosts can keep it next to their own settings; durations
/// are written as milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(with = "millis", rename = "sync_timeout_ms")]
    pub sync_timeout: Duration,
    pub batch_size: usize,
    pub max_attempts: Option<u32>,
    pub dedup_consecutive: bool,
    pub persist_queue: bool,
    pub sync_on_open: bool,
    pub format: SnapshotFormat,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(10),
            batch_size: 50,
            max_attempts: None,
            dedup_consecutive: false,
            persist_queue: true,
            sync_on_open: true,
            format: SnapshotFormat::Json,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a reconciler call may take before the batch counts as failed.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Max writes handed to the reconciler per call.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Dead-letter a write after this many failed attempts. Every claim
    /// counts as an attempt, so values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max.max(1));
        self
    }

    /// Skip queuing an offline write equal to the newest pending one.
    pub fn with_dedup_consecutive(mut self, dedup: bool) -> Self {
        self.dedup_consecutive = dedup;
        self
    }

    /// Mirror the pending queue to durable storage.
    pub fn with_persist_queue(mut self, persist: bool) -> Self {
        self.persist_queue = persist;
        self
    }

    /// Sync a restored queue right away when the store opens online.
    pub fn with_sync_on_open(mut self, sync: bool) -> Self {
        self.sync_on_open = sync;
        self
    }

    pub fn with_format(mut self, format: SnapshotFormat) -> Self {
        self.format = format;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
