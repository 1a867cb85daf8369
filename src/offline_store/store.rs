use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::SnapshotFormat;
use crate::connectivity::{
    Connectivity, ConnectivityEvent, ConnectivityListener, ConnectivityObserver, Subscription,
};
use crate::error::{SnapshotFault, StoreError};
use crate::storage::KeyValueStore;
use crate::sync::{
    PendingQueue, PendingWrite, ReconcileBatch, Reconciler, SyncReport, SyncSkip, SyncWorker,
};

use super::config::{StoreConfig, QUEUE_KEY_SUFFIX};

/// Bounds every stored value must meet.
pub trait StoreValue:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> StoreValue for T where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Typed value mirrored to durable storage, with offline writes buffered
/// for reconciliation.
///
/// ## Example
///
/// ```ignore
/// use offline_store::{InMemoryKeyValueStore, LogReconciler, ManualConnectivity, OfflineStore};
///
/// let network = ManualConnectivity::offline();
/// let draft = OfflineStore::builder("draft", String::new())
///     .with_reconciler(LogReconciler::new())
///     .open(InMemoryKeyValueStore::new(), network.clone());
///
/// draft.update(|_| "hello".to_string());
/// assert!(draft.has_pending_sync());
///
/// network.go_online(); // queued write is reconciled here
/// assert!(!draft.has_pending_sync());
/// ```
///
/// Update closures run while the store's lock is held and must not call back
/// into the same store.
pub struct OfflineStore<T: StoreValue> {
    shared: Arc<Shared<T>>,
    subscription: Option<Subscription>,
}

/// Builder for [`OfflineStore`] when a reconciler or non-default config is
/// needed.
pub struct OfflineStoreBuilder<T> {
    key: String,
    initial: T,
    config: StoreConfig,
    reconciler: Option<Arc<dyn Reconciler<T>>>,
}

struct Shared<T> {
    key: String,
    queue_key: String,
    initial: T,
    config: StoreConfig,
    storage: Arc<dyn KeyValueStore>,
    connectivity: Arc<dyn ConnectivityObserver>,
    worker: Option<SyncWorker<T>>,
    state: Mutex<StoreState<T>>,
    syncing: AtomicBool,
    /// Set by a trigger that found a sync in flight.
    rerun: AtomicBool,
}

struct StoreState<T> {
    value: T,
    connectivity: ConnectivityEvent,
    queue: PendingQueue<T>,
    last_sync: Option<SyncReport>,
    last_error: Option<StoreError>,
}

/// Holds the in-flight flag for the duration of one sync.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: StoreValue> OfflineStoreBuilder<T> {
    pub fn new(key: impl Into<String>, initial: T) -> Self {
        Self {
            key: key.into(),
            initial,
            config: StoreConfig::default(),
            reconciler: None,
        }
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the remote side. Without one, offline writes stay queued.
    pub fn with_reconciler<R>(mut self, reconciler: R) -> Self
    where
        R: Reconciler<T> + 'static,
    {
        let reconciler: Arc<dyn Reconciler<T>> = Arc::new(reconciler);
        self.reconciler = Some(reconciler);
        self
    }

    /// Restore the persisted value and queue, then start tracking
    /// connectivity.
    pub fn open<S, C>(self, storage: S, connectivity: C) -> OfflineStore<T>
    where
        S: KeyValueStore + 'static,
        C: ConnectivityObserver + 'static,
    {
        let OfflineStoreBuilder {
            key,
            initial,
            config,
            reconciler,
        } = self;
        let storage: Arc<dyn KeyValueStore> = Arc::new(storage);
        let connectivity: Arc<dyn ConnectivityObserver> = Arc::new(connectivity);
        let queue_key = format!("{}{}", key, QUEUE_KEY_SUFFIX);
        let mut last_error = None;

        let value = match load::<T>(&*storage, config.format, &key) {
            Ok(Some(value)) => {
                debug!(key = %key, "restored persisted value");
                value
            }
            Ok(None) => initial.clone(),
            Err(fault) => {
                let err = StoreError::deserialization(&key, fault);
                warn!(key = %key, error = %err, "falling back to initial value");
                last_error = Some(err);
                initial.clone()
            }
        };

        let mut queue = PendingQueue::new();
        if config.persist_queue {
            match load::<PendingQueue<T>>(&*storage, config.format, &queue_key) {
                Ok(Some(restored)) => queue = restored,
                Ok(None) => {}
                Err(fault) => {
                    let err = StoreError::deserialization(&queue_key, fault);
                    warn!(key = %key, error = %err, "starting with an empty pending queue");
                    last_error = Some(err);
                }
            }
        }
        let interrupted = queue.release_in_flight("interrupted before confirmation");
        if interrupted > 0 {
            info!(key = %key, interrupted, "requeued writes left in flight by a previous run");
        }
        if !queue.is_empty() {
            info!(key = %key, pending = queue.len(), "restored pending writes");
        }

        let worker = reconciler.map(|reconciler| {
            SyncWorker::new(reconciler)
                .with_batch_size(config.batch_size)
                .with_timeout(config.sync_timeout)
                .with_max_attempts(config.max_attempts)
        });

        let current = connectivity.current();
        let shared = Arc::new(Shared {
            key,
            queue_key,
            initial,
            config,
            storage,
            connectivity,
            worker,
            state: Mutex::new(StoreState {
                value,
                connectivity: current,
                queue,
                last_sync: None,
                last_error,
            }),
            syncing: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&shared);
        let listener: ConnectivityListener = Arc::new(move |event: ConnectivityEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.observe(event);
            }
        });
        let subscription = match shared.connectivity.subscribe(listener) {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                warn!(key = %shared.key, error = %err, "connectivity tracking unavailable");
                None
            }
        };

        // Edges between reading the initial state and subscribing.
        shared.observe(shared.connectivity.current());

        let restored_online = {
            let state = shared.lock_state();
            state.connectivity.state.is_online() && !state.queue.is_empty()
        };
        if shared.config.sync_on_open && restored_online {
            shared.sync();
        }

        OfflineStore {
            shared,
            subscription,
        }
    }
}

impl<T: StoreValue> OfflineStore<T> {
    /// Open a store with the default config and no reconciler.
    pub fn new<S, C>(key: impl Into<String>, initial: T, storage: S, connectivity: C) -> Self
    where
        S: KeyValueStore + 'static,
        C: ConnectivityObserver + 'static,
    {
        OfflineStoreBuilder::new(key, initial).open(storage, connectivity)
    }

    pub fn builder(key: impl Into<String>, initial: T) -> OfflineStoreBuilder<T> {
        OfflineStoreBuilder::new(key, initial)
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Current value.
    pub fn read(&self) -> T {
        self.shared.lock_state().value.clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.shared.lock_state().value)
    }

    /// Replace the value.
    pub fn set(&self, value: T) {
        self.update(move |_| value)
    }

    /// Derive the next value from the current one.
    ///
    /// The new value is queued when the store is offline and is written to
    /// durable storage before this returns. Storage faults are logged and
    /// kept in [`last_error`](Self::last_error); the in-memory value changes
    /// regardless.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        let next = f(&state.value);

        let queued = if state.connectivity.state.is_online() {
            None
        } else if shared.config.dedup_consecutive {
            state.queue.push_dedup(next.clone())
        } else {
            Some(state.queue.push(next.clone()))
        };
        state.value = next;

        shared.persist_value(&mut state);
        if let Some(seq) = queued {
            debug!(key = %shared.key, seq, "queued offline write");
            shared.persist_queue(&mut state);
        }
    }

    /// Reset to the initial value and delete the persisted snapshot.
    ///
    /// Pending writes are left queued; use
    /// [`discard_pending`](Self::discard_pending) to drop them as well.
    pub fn clear(&self) {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        if let Err(err) = shared.storage.remove(&shared.key) {
            shared.record(&mut state, StoreError::persist(&shared.key, err));
        }
        state.value = shared.initial.clone();
        debug!(key = %shared.key, "cleared");
    }

    pub fn is_online(&self) -> bool {
        self.connectivity().is_online()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.shared.lock_state().connectivity.state
    }

    /// True while offline writes await confirmation.
    pub fn has_pending_sync(&self) -> bool {
        !self.shared.lock_state().queue.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock_state().queue.len()
    }

    /// Copy of the queued writes, oldest first.
    pub fn pending(&self) -> Vec<PendingWrite<T>> {
        self.shared.lock_state().queue.entries().to_vec()
    }

    /// Drop every queued write and return them.
    pub fn discard_pending(&self) -> Vec<PendingWrite<T>> {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        let discarded = state.queue.drain();
        if !discarded.is_empty() {
            info!(key = %shared.key, discarded = discarded.len(), "discarded pending writes");
        }
        shared.persist_queue(&mut state);
        discarded
    }

    /// Writes that used up their attempts.
    pub fn dead_letters(&self) -> Vec<PendingWrite<T>> {
        self.shared.lock_state().queue.dead_letters().to_vec()
    }

    pub fn take_dead_letters(&self) -> Vec<PendingWrite<T>> {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        let taken = state.queue.take_dead_letters();
        shared.persist_queue(&mut state);
        taken
    }

    /// True while a sync runs or a timed-out reconciler call has not
    /// returned yet.
    pub fn is_syncing(&self) -> bool {
        self.shared.syncing.load(Ordering::Acquire)
            || self.shared.worker.as_ref().is_some_and(SyncWorker::is_busy)
    }

    pub fn last_sync(&self) -> Option<SyncReport> {
        self.shared.lock_state().last_sync.clone()
    }

    /// Most recent recovered fault, if any.
    pub fn last_error(&self) -> Option<StoreError> {
        self.shared.lock_state().last_error.clone()
    }

    /// Reconcile queued writes now instead of waiting for the next online
    /// transition.
    pub fn sync_now(&self) -> SyncReport {
        self.shared.sync()
    }

    /// Stop tracking connectivity. Dropping the store does the same.
    pub fn dispose(mut self) {
        self.unsubscribe();
    }

    fn unsubscribe(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        match self.shared.connectivity.unsubscribe(&subscription) {
            Ok(_) => debug!(key = %self.shared.key, "stopped connectivity tracking"),
            Err(err) => {
                warn!(key = %self.shared.key, error = %err, "failed to unsubscribe from connectivity")
            }
        }
    }
}

impl<T: StoreValue> Drop for OfflineStore<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T: StoreValue> Shared<T> {
    fn lock_state(&self) -> MutexGuard<'_, StoreState<T>> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, state: &mut StoreState<T>, err: StoreError) {
        warn!(key = %err.key(), error = %err, "recovered store fault");
        state.last_error = Some(err);
    }

    fn save<V: Serialize>(&self, key: &str, value: &V) -> Result<(), SnapshotFault> {
        let raw = self.config.format.encode(value)?;
        self.storage.set(key, &raw)?;
        Ok(())
    }

    fn persist_value(&self, state: &mut StoreState<T>) {
        if let Err(fault) = self.save(&self.key, &state.value) {
            self.record(state, StoreError::persist(&self.key, fault));
        }
    }

    fn persist_queue(&self, state: &mut StoreState<T>) {
        if !self.config.persist_queue {
            return;
        }
        let result = if state.queue.is_idle() {
            self.storage
                .remove(&self.queue_key)
                .map(|_| ())
                .map_err(SnapshotFault::from)
        } else {
            self.save(&self.queue_key, &state.queue)
        };
        if let Err(fault) = result {
            self.record(state, StoreError::persist(&self.queue_key, fault));
        }
    }

    fn observe(&self, event: ConnectivityEvent) {
        let came_online_with_work = {
            let mut state = self.lock_state();
            if event.generation <= state.connectivity.generation {
                return;
            }
            let was_online = state.connectivity.state.is_online();
            state.connectivity = event;
            debug!(
                key = %self.key,
                state = ?event.state,
                generation = event.generation,
                "connectivity changed"
            );
            !was_online && event.state.is_online() && !state.queue.is_empty()
        };

        if came_online_with_work {
            self.sync();
        }
    }

    fn sync(&self) -> SyncReport {
        let Some(worker) = &self.worker else {
            let report = SyncReport::skipped(SyncSkip::NoReconciler);
            self.lock_state().last_sync = Some(report.clone());
            return report;
        };

        let mut first: Option<SyncReport> = None;
        loop {
            let Some(in_flight) = InFlight::acquire(&self.syncing) else {
                // The running sync picks this up before it returns.
                self.rerun.store(true, Ordering::Release);
                if self.syncing.load(Ordering::Acquire) {
                    debug!(key = %self.key, "sync already in flight, rerun requested");
                    return first.unwrap_or_else(|| SyncReport::skipped(SyncSkip::InFlight));
                }
                continue;
            };
            // This run sees every write queued so far.
            self.rerun.store(false, Ordering::Release);

            let report = self.drain(worker);
            let first_run = first.is_none();
            if first_run || report.did_work() {
                self.lock_state().last_sync = Some(report.clone());
            }
            if first_run {
                first = Some(report);
            }
            drop(in_flight);

            if !self.rerun.swap(false, Ordering::AcqRel) {
                return first.unwrap_or_else(|| SyncReport::skipped(SyncSkip::InFlight));
            }
            debug!(key = %self.key, "rerunning sync for a trigger that arrived mid-sync");
        }
    }

    fn drain(&self, worker: &SyncWorker<T>) -> SyncReport {
        let mut report = SyncReport::default();

        loop {
            if worker.is_busy() {
                debug!(key = %self.key, "previous reconciler call still running");
                if !report.did_work() {
                    report.skipped = Some(SyncSkip::InFlight);
                }
                break;
            }
            let writes = {
                let mut state = self.lock_state();
                if !state.connectivity.state.is_online() {
                    if !report.did_work() {
                        report.skipped = Some(SyncSkip::Offline);
                    }
                    break;
                }
                let writes = state.queue.claim(worker.batch_size());
                if writes.is_empty() {
                    if !report.did_work() {
                        report.skipped = Some(SyncSkip::NothingPending);
                    }
                    break;
                }
                self.persist_queue(&mut state);
                writes
            };

            let seqs: Vec<u64> = writes.iter().map(|w| w.seq).collect();
            debug!(key = %self.key, writes = seqs.len(), "handing batch to reconciler");
            let result = worker.dispatch(ReconcileBatch {
                key: self.key.clone(),
                writes,
            });

            let batch = {
                let mut state = self.lock_state();
                let batch = worker.apply(&mut state.queue, &seqs, &result);
                if let Err(err) = &result {
                    self.record(&mut state, StoreError::reconciliation(&self.key, err));
                }
                self.persist_queue(&mut state);
                batch
            };
            report.absorb(batch);

            if let Err(err) = result {
                report.error = Some(err);
                break;
            }
            if !batch.fully_accepted() {
                break;
            }
        }

        if report.did_work() {
            info!(
                key = %self.key,
                batches = report.batches,
                accepted = report.accepted,
                released = report.released,
                dead_lettered = report.dead_lettered,
                "sync finished"
            );
        }
        report
    }
}

fn load<V: DeserializeOwned>(
    storage: &dyn KeyValueStore,
    format: SnapshotFormat,
    key: &str,
) -> Result<Option<V>, SnapshotFault> {
    match storage.get(key)? {
        Some(raw) => Ok(Some(format.decode(&raw)?)),
        None => Ok(None),
    }
}
