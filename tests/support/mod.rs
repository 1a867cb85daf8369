//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use offline_store::{
    Connectivity, ConnectivityError, ConnectivityEvent, ConnectivityListener,
    ConnectivityObserver, InMemoryKeyValueStore, ItemOutcome, KeyValueStore, ReconcileBatch,
    ReconcileError, Reconciler, StorageError, Subscription,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
}

impl Draft {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

static TRACING: Once = Once::new();

/// Route store logs to the test harness output (`RUST_LOG=offline_store=debug`).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Poll `condition` until it holds or two seconds pass.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Key-value store whose operations can be made to fail on demand.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: InMemoryKeyValueStore,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    failing_keys: Arc<Mutex<HashSet<String>>>,
}

impl FlakyStore {
    pub fn new(inner: InMemoryKeyValueStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Refuse writes and removals for `key` only.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    fn refuses(&self, key: &str) -> bool {
        self.fail_writes.load(Ordering::SeqCst) || self.failing_keys.lock().unwrap().contains(key)
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Io("read refused".into()));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.refuses(key) {
            return Err(StorageError::Io("write refused".into()));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        if self.refuses(key) {
            return Err(StorageError::Io("remove refused".into()));
        }
        self.inner.remove(key)
    }
}

/// Observer that reports offline and refuses every subscription.
#[derive(Clone, Copy, Default)]
pub struct RefusingConnectivity;

impl ConnectivityObserver for RefusingConnectivity {
    fn current(&self) -> ConnectivityEvent {
        ConnectivityEvent::new(Connectivity::Offline, 0)
    }

    fn subscribe(&self, _: ConnectivityListener) -> Result<Subscription, ConnectivityError> {
        Err(ConnectivityError::SubscribeFailed("no network service".into()))
    }

    fn unsubscribe(&self, _: &Subscription) -> Result<bool, ConnectivityError> {
        Ok(false)
    }

    fn listener_count(&self) -> usize {
        0
    }
}

/// Reconciler driven by the test: records every batch, rejects chosen
/// values, can fail or stall.
#[derive(Clone, Default)]
pub struct ScriptedReconciler {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    reject: Arc<Mutex<HashSet<String>>>,
    fail: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any write whose text equals `text`.
    pub fn reject_text(&self, text: &str) {
        self.reject.lock().unwrap().insert(text.to_string());
    }

    pub fn accept_everything(&self) {
        self.reject.lock().unwrap().clear();
        self.fail.store(false, Ordering::SeqCst);
        *self.delay.lock().unwrap() = None;
    }

    pub fn fail_transport(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn stall_for(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Texts handed over, one entry per call.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.calls().into_iter().flatten().collect()
    }

    /// Most calls ever running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn answer(&self, batch: &ReconcileBatch<Draft>) -> Result<Vec<ItemOutcome>, ReconcileError> {
        self.calls
            .lock()
            .unwrap()
            .push(batch.writes.iter().map(|w| w.value.text.clone()).collect());

        // decided at call time, so a test can change the script mid-call
        let fail = self.fail.load(Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if fail {
            return Err(ReconcileError::Transport("503 service unavailable".into()));
        }

        let reject = self.reject.lock().unwrap();
        Ok(batch
            .writes
            .iter()
            .map(|w| {
                if reject.contains(&w.value.text) {
                    ItemOutcome::rejected(w.seq, format!("conflict on {}", w.value.text))
                } else {
                    ItemOutcome::accepted(w.seq)
                }
            })
            .collect())
    }
}

impl Reconciler<Draft> for ScriptedReconciler {
    fn reconcile(&self, batch: &ReconcileBatch<Draft>) -> Result<Vec<ItemOutcome>, ReconcileError> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let result = self.answer(batch);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
