use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Status of a buffered write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingStatus {
    #[default]
    Pending,
    InFlight,
}

/// A value written while offline, waiting for the reconciler to confirm it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite<T> {
    /// Per-store sequence number. Strictly increasing, never reused.
    pub seq: u64,
    pub value: T,
    pub recorded_at: SystemTime,
    pub status: PendingStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl<T> PendingWrite<T> {
    pub fn new(seq: u64, value: T) -> Self {
        Self {
            seq,
            value,
            recorded_at: SystemTime::now(),
            status: PendingStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == PendingStatus::Pending
    }

    pub fn is_in_flight(&self) -> bool {
        self.status == PendingStatus::InFlight
    }

    fn claim(&mut self) {
        self.status = PendingStatus::InFlight;
        self.attempts += 1;
    }

    fn release(&mut self, error: &str) {
        self.status = PendingStatus::Pending;
        self.last_error = if error.is_empty() {
            None
        } else {
            Some(error.to_string())
        };
    }
}

/// What happened to an entry handed back by [`PendingQueue::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// Back in the queue for the next attempt.
    Requeued,
    /// Attempts exhausted; moved to the dead-letter list.
    DeadLettered,
    /// No in-flight entry with that sequence number.
    Missing,
}

/// Ordered buffer of offline writes plus the writes that gave up.
///
/// Entries leave the queue one at a time, only when accepted; there is no
/// operation that clears the queue as a side effect of a sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingQueue<T> {
    next_seq: u64,
    entries: Vec<PendingWrite<T>>,
    dead_letters: Vec<PendingWrite<T>>,
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self {
            next_seq: 1,
            entries: Vec::new(),
            dead_letters: Vec::new(),
        }
    }
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nothing queued and nothing dead-lettered.
    pub fn is_idle(&self) -> bool {
        self.entries.is_empty() && self.dead_letters.is_empty()
    }

    pub fn entries(&self) -> &[PendingWrite<T>] {
        &self.entries
    }

    pub fn dead_letters(&self) -> &[PendingWrite<T>] {
        &self.dead_letters
    }

    /// Append a write and return its sequence number.
    pub fn push(&mut self, value: T) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(PendingWrite::new(seq, value));
        seq
    }

    /// Remove an accepted in-flight entry.
    pub fn accept(&mut self, seq: u64) -> bool {
        match self
            .entries
            .iter()
            .position(|w| w.seq == seq && w.is_in_flight())
        {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Return an in-flight entry to the queue, or dead-letter it once it has
    /// used `max_attempts`.
    pub fn release(&mut self, seq: u64, error: &str, max_attempts: Option<u32>) -> Release {
        let Some(index) = self
            .entries
            .iter()
            .position(|w| w.seq == seq && w.is_in_flight())
        else {
            return Release::Missing;
        };

        self.entries[index].release(error);
        match max_attempts {
            Some(max) if self.entries[index].attempts >= max => {
                let write = self.entries.remove(index);
                self.dead_letters.push(write);
                Release::DeadLettered
            }
            _ => Release::Requeued,
        }
    }

    /// Reset every in-flight entry to pending (used after a restart, when no
    /// outcome can arrive any more).
    pub fn release_in_flight(&mut self, error: &str) -> usize {
        let mut released = 0;
        for write in self.entries.iter_mut().filter(|w| w.is_in_flight()) {
            write.release(error);
            released += 1;
        }
        released
    }

    /// Remove and return every queued entry. Dead letters are kept.
    pub fn drain(&mut self) -> Vec<PendingWrite<T>> {
        std::mem::take(&mut self.entries)
    }

    pub fn take_dead_letters(&mut self) -> Vec<PendingWrite<T>> {
        std::mem::take(&mut self.dead_letters)
    }
}

impl<T: Clone> PendingQueue<T> {
    /// Mark up to `limit` pending entries in flight, oldest first, and return
    /// copies of them.
    pub fn claim(&mut self, limit: usize) -> Vec<PendingWrite<T>> {
        let mut claimed = Vec::new();
        for write in self.entries.iter_mut().filter(|w| w.is_pending()) {
            if claimed.len() >= limit {
                break;
            }
            write.claim();
            claimed.push(write.clone());
        }
        claimed
    }
}

impl<T: PartialEq> PendingQueue<T> {
    /// Like [`push`](Self::push), but skips the write when the newest pending
    /// entry already holds the same value.
    pub fn push_dedup(&mut self, value: T) -> Option<u64> {
        match self.entries.last() {
            Some(last) if last.is_pending() && last.value == value => None,
            _ => Some(self.push(value)),
        }
    }
}
