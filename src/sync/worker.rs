use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::pending::{PendingQueue, Release};
use super::reconciler::{ItemStatus, ItemOutcome, ReconcileBatch, ReconcileError, Reconciler};

/// Why a sync did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSkip {
    Offline,
    NothingPending,
    InFlight,
    NoReconciler,
}

/// Result of one batch handed to the reconciler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    pub claimed: usize,
    pub accepted: usize,
    /// Rejected or unanswered writes put back in the queue.
    pub released: usize,
    /// Rejected writes that used up their attempts.
    pub dead_lettered: usize,
}

impl BatchResult {
    pub fn fully_accepted(&self) -> bool {
        self.accepted == self.claimed
    }
}

/// Result of a sync run (one or more batches).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub batches: usize,
    pub claimed: usize,
    pub accepted: usize,
    pub released: usize,
    pub dead_lettered: usize,
    /// Set when the last batch failed as a whole.
    pub error: Option<ReconcileError>,
    /// Set when nothing was attempted.
    pub skipped: Option<SyncSkip>,
}

impl SyncReport {
    pub fn skipped(reason: SyncSkip) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn did_work(&self) -> bool {
        self.batches > 0
    }

    pub fn absorb(&mut self, batch: BatchResult) {
        self.batches += 1;
        self.claimed += batch.claimed;
        self.accepted += batch.accepted;
        self.released += batch.released;
        self.dead_lettered += batch.dead_lettered;
    }
}

/// Hands claimed writes to a [`Reconciler`] and folds the verdicts back into
/// the queue.
///
/// Claiming and applying run under the caller's lock; [`dispatch`] runs
/// without it, on a dedicated thread bounded by the timeout.
///
/// At most one reconciler call runs at a time. A call abandoned after a
/// timeout keeps the worker busy until it actually returns.
///
/// [`dispatch`]: SyncWorker::dispatch
pub struct SyncWorker<T> {
    reconciler: Arc<dyn Reconciler<T>>,
    batch_size: usize,
    timeout: Duration,
    max_attempts: Option<u32>,
    running: Arc<AtomicBool>,
}

/// Clears the running flag when the reconciler call ends, panics included.
struct Running(Arc<AtomicBool>);

impl Drop for Running {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> SyncWorker<T> {
    pub fn new(reconciler: Arc<dyn Reconciler<T>>) -> Self {
        Self {
            reconciler,
            batch_size: 50,
            timeout: Duration::from_secs(10),
            max_attempts: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the batch size (max writes per reconciler call).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set how long to wait for the reconciler before giving up on a batch.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the attempts after which a rejected write is dead-lettered.
    /// Every claim counts as an attempt, so the floor is 1.
    pub fn with_max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max.map(|max| max.max(1));
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True while a reconciler call is running, including one whose wait
    /// already timed out.
    pub fn is_busy(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Fold a reconciler result into the queue.
    ///
    /// Accepted writes are removed; everything else claimed in this batch is
    /// released with the reason recorded. Outcomes for sequence numbers that
    /// were not claimed are ignored.
    pub fn apply(
        &self,
        queue: &mut PendingQueue<T>,
        claimed: &[u64],
        result: &Result<Vec<ItemOutcome>, ReconcileError>,
    ) -> BatchResult {
        let mut batch = BatchResult {
            claimed: claimed.len(),
            ..Default::default()
        };

        for &seq in claimed {
            let verdict = match result {
                Ok(outcomes) => outcomes
                    .iter()
                    .find(|o| o.seq == seq)
                    .map(|o| o.status.clone()),
                Err(err) => Some(ItemStatus::Rejected(err.to_string())),
            };

            match verdict {
                Some(ItemStatus::Accepted) => {
                    if queue.accept(seq) {
                        batch.accepted += 1;
                    }
                }
                Some(ItemStatus::Rejected(reason)) => {
                    self.release(queue, seq, &reason, &mut batch)
                }
                None => self.release(queue, seq, "no outcome reported", &mut batch),
            }
        }

        if let Ok(outcomes) = result {
            for stray in outcomes.iter().filter(|o| !claimed.contains(&o.seq)) {
                debug!(seq = stray.seq, "ignoring outcome for unclaimed write");
            }
        }

        batch
    }

    fn release(&self, queue: &mut PendingQueue<T>, seq: u64, reason: &str, batch: &mut BatchResult) {
        match queue.release(seq, reason, self.max_attempts) {
            Release::Requeued => batch.released += 1,
            Release::DeadLettered => {
                warn!(seq, reason, "write exhausted its attempts and was dead-lettered");
                batch.dead_lettered += 1;
            }
            Release::Missing => {}
        }
    }
}

impl<T: Send + Sync + 'static> SyncWorker<T> {
    /// Run the reconciler for one batch, waiting at most the configured
    /// timeout. A late answer after a timeout is discarded.
    ///
    /// Fails with [`ReconcileError::Busy`] while an earlier call is still
    /// running.
    pub fn dispatch(&self, batch: ReconcileBatch<T>) -> Result<Vec<ItemOutcome>, ReconcileError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ReconcileError::Busy);
        }

        let (tx, rx) = channel();
        let reconciler = Arc::clone(&self.reconciler);
        let running = Running(Arc::clone(&self.running));
        // Thread names may not hold NUL bytes; keys may.
        let name = format!("offline-sync-{}", batch.key.escape_default());

        let spawned = thread::Builder::new().name(name).spawn(move || {
            let result = {
                let _running = running;
                reconciler.reconcile(&batch)
            };
            let _ = tx.send(result);
        });
        if let Err(err) = spawned {
            self.running.store(false, Ordering::Release);
            return Err(ReconcileError::Spawn(err.to_string()));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.timeout, "abandoned reconciler call");
                Err(ReconcileError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ReconcileError::WorkerLost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::PendingWrite;

    fn accept_all() -> Arc<dyn Reconciler<i32>> {
        Arc::new(|b: &ReconcileBatch<i32>| -> Result<Vec<ItemOutcome>, ReconcileError> {
            Ok(b.writes.iter().map(|w| ItemOutcome::accepted(w.seq)).collect())
        })
    }

    fn claimed_queue(values: &[i32]) -> (PendingQueue<i32>, Vec<u64>) {
        let mut queue = PendingQueue::new();
        for v in values {
            queue.push(*v);
        }
        let seqs = queue.claim(values.len()).iter().map(|w| w.seq).collect();
        (queue, seqs)
    }

    #[test]
    fn worker_builder() {
        let worker = SyncWorker::new(accept_all())
            .with_batch_size(0)
            .with_timeout(Duration::from_millis(250))
            .with_max_attempts(Some(4));

        assert_eq!(worker.batch_size, 1);
        assert_eq!(worker.timeout, Duration::from_millis(250));
        assert_eq!(worker.max_attempts, Some(4));
    }

    #[test]
    fn zero_max_attempts_means_one() {
        let worker = SyncWorker::new(accept_all()).with_max_attempts(Some(0));
        assert_eq!(worker.max_attempts, Some(1));
    }

    #[test]
    fn apply_removes_only_accepted() {
        let worker = SyncWorker::new(accept_all());
        let (mut queue, seqs) = claimed_queue(&[10, 20, 30]);
        let result = Ok(vec![
            ItemOutcome::accepted(seqs[0]),
            ItemOutcome::rejected(seqs[1], "stale"),
            ItemOutcome::accepted(seqs[2]),
        ]);

        let batch = worker.apply(&mut queue, &seqs, &result);
        assert_eq!(batch.accepted, 2);
        assert_eq!(batch.released, 1);
        assert!(!batch.fully_accepted());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.entries()[0].value, 20);
        assert_eq!(queue.entries()[0].last_error.as_deref(), Some("stale"));
    }

    #[test]
    fn apply_releases_missing_outcomes() {
        let worker = SyncWorker::new(accept_all());
        let (mut queue, seqs) = claimed_queue(&[1, 2]);
        let result = Ok(vec![ItemOutcome::accepted(seqs[0]), ItemOutcome::accepted(99)]);

        let batch = worker.apply(&mut queue, &seqs, &result);
        assert_eq!(batch.accepted, 1);
        assert_eq!(batch.released, 1);
        assert_eq!(
            queue.entries()[0].last_error.as_deref(),
            Some("no outcome reported")
        );
    }

    #[test]
    fn apply_transport_error_releases_batch() {
        let worker = SyncWorker::new(accept_all()).with_max_attempts(Some(1));
        let (mut queue, seqs) = claimed_queue(&[1, 2]);
        let result = Err(ReconcileError::Transport("502".into()));

        let batch = worker.apply(&mut queue, &seqs, &result);
        assert_eq!(batch.dead_lettered, 2);
        assert!(queue.is_empty());
        assert_eq!(queue.dead_letters().len(), 2);
    }

    #[test]
    fn dispatch_returns_reconciler_answer() {
        let worker = SyncWorker::new(accept_all());
        let batch = ReconcileBatch {
            key: "k".into(),
            writes: vec![PendingWrite::new(7, 1)],
        };
        assert_eq!(
            worker.dispatch(batch).unwrap(),
            vec![ItemOutcome::accepted(7)]
        );
    }

    #[test]
    fn dispatch_times_out() {
        let slow: Arc<dyn Reconciler<i32>> =
            Arc::new(|_: &ReconcileBatch<i32>| -> Result<Vec<ItemOutcome>, ReconcileError> {
                thread::sleep(Duration::from_millis(500));
                Ok(Vec::new())
            });
        let worker = SyncWorker::new(slow).with_timeout(Duration::from_millis(20));
        let batch = ReconcileBatch {
            key: "k".into(),
            writes: vec![PendingWrite::new(1, 1)],
        };
        assert_eq!(
            worker.dispatch(batch),
            Err(ReconcileError::Timeout(Duration::from_millis(20)))
        );
    }

    #[test]
    fn dispatch_survives_reconciler_panic() {
        let panicking: Arc<dyn Reconciler<i32>> =
            Arc::new(|_: &ReconcileBatch<i32>| -> Result<Vec<ItemOutcome>, ReconcileError> {
                panic!("remote exploded")
            });
        let worker = SyncWorker::new(panicking);
        let batch = ReconcileBatch {
            key: "k".into(),
            writes: Vec::new(),
        };
        assert_eq!(worker.dispatch(batch), Err(ReconcileError::WorkerLost));
    }

    #[test]
    fn dispatch_accepts_keys_with_nul_bytes() {
        let worker = SyncWorker::new(accept_all());
        let batch = ReconcileBatch {
            key: "draft\0tab".into(),
            writes: vec![PendingWrite::new(3, 1)],
        };
        assert_eq!(
            worker.dispatch(batch).unwrap(),
            vec![ItemOutcome::accepted(3)]
        );
        assert!(!worker.is_busy());
    }

    #[test]
    fn abandoned_call_keeps_worker_busy() {
        let slow: Arc<dyn Reconciler<i32>> =
            Arc::new(|_: &ReconcileBatch<i32>| -> Result<Vec<ItemOutcome>, ReconcileError> {
                thread::sleep(Duration::from_millis(200));
                Ok(Vec::new())
            });
        let worker = SyncWorker::new(slow).with_timeout(Duration::from_millis(10));
        let batch = || ReconcileBatch {
            key: "k".into(),
            writes: vec![PendingWrite::new(1, 1)],
        };

        assert!(matches!(worker.dispatch(batch()), Err(ReconcileError::Timeout(_))));
        assert!(worker.is_busy());
        assert_eq!(worker.dispatch(batch()), Err(ReconcileError::Busy));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while worker.is_busy() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!worker.is_busy());
    }

    #[test]
    fn panic_clears_busy_flag() {
        let panicking: Arc<dyn Reconciler<i32>> =
            Arc::new(|_: &ReconcileBatch<i32>| -> Result<Vec<ItemOutcome>, ReconcileError> {
                panic!("remote exploded")
            });
        let worker = SyncWorker::new(panicking);
        let batch = ReconcileBatch {
            key: "k".into(),
            writes: Vec::new(),
        };
        assert_eq!(worker.dispatch(batch), Err(ReconcileError::WorkerLost));
        assert!(!worker.is_busy());
    }
}
