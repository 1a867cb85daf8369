//! Offline-aware typed value store.
//!
//! An [`OfflineStore`] keeps one value per key, mirrors it to a
//! [`KeyValueStore`], follows reachability through a
//! [`ConnectivityObserver`], and buffers writes made while offline until a
//! [`Reconciler`] confirms them.

mod codec;
mod connectivity;
mod error;
mod offline_store;
mod storage;
mod sync;

pub use codec::{CodecError, SnapshotFormat};
pub use connectivity::{
    Connectivity, ConnectivityError, ConnectivityEvent, ConnectivityListener,
    ConnectivityObserver, ManualConnectivity, Subscription,
};
#[cfg(feature = "emitter")]
pub use connectivity::{EmitterConnectivity, OFFLINE_EVENT, ONLINE_EVENT};
pub use error::StoreError;
pub use offline_store::{
    OfflineStore, OfflineStoreBuilder, StoreConfig, StoreValue, QUEUE_KEY_SUFFIX,
};
pub use storage::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore, StorageError};
pub use sync::{
    BatchResult, ItemOutcome, ItemStatus, LogReconciler, PendingQueue, PendingStatus,
    PendingWrite, ReconcileBatch, ReconcileError, Reconciler, Release, SyncReport, SyncSkip,
    SyncWorker,
};
