//! SinkQueue - bounded FIFO between the dispatcher and one sink worker
//!
//! Unlike an mpsc channel, the producer side can evict the oldest entry,
//! and the queue tracks unfinished entries so shutdown can wait for a drain.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::Record;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// Entry handed to a sink worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    /// A record to publish
    Record(Record),
    /// Stop sentinel: the worker exits after acknowledging it
    Stop,
}

/// Result of an insert that may displace the oldest record
#[derive(Debug)]
pub enum PushOutcome {
    /// Inserted without touching existing entries
    Inserted,
    /// Inserted after evicting the returned oldest record
    Displaced(Record),
    /// Not inserted; the record is handed back
    Rejected(Record),
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    /// Entries pushed but not yet acknowledged with `task_done`
    unfinished: usize,
}

/// Bounded, thread-safe FIFO with drain tracking
#[derive(Debug)]
pub struct SinkQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    not_empty: Notify,
    not_full: Notify,
    all_done: Notify,
}

impl SinkQueue {
    /// Create a queue holding at most `capacity` records (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            all_done: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // a panic while holding the lock cannot leave the deque half-updated
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Whether every pushed entry has been acknowledged
    pub fn is_drained(&self) -> bool {
        self.lock().unfinished == 0
    }

    /// Copy of the queued records, oldest first
    pub fn records(&self) -> Vec<Record> {
        self.lock()
            .entries
            .iter()
            .filter_map(|entry| match entry {
                QueueEntry::Record(record) => Some(record.clone()),
                QueueEntry::Stop => None,
            })
            .collect()
    }

    /// Insert at the tail if there is room
    pub fn try_push(&self, record: Record) -> Result<(), Record> {
        {
            let mut state = self.lock();
            if state.entries.len() >= self.capacity {
                return Err(record);
            }
            state.entries.push_back(QueueEntry::Record(record));
            state.unfinished += 1;
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Insert at the tail, evicting the oldest record when full
    ///
    /// Eviction and insertion happen under one lock, so a full queue always
    /// ends up holding the newest record. A stop sentinel is never evicted.
    pub fn push_displacing(&self, record: Record) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.entries.len() < self.capacity {
                state.entries.push_back(QueueEntry::Record(record));
                state.unfinished += 1;
                PushOutcome::Inserted
            } else {
                match state.entries.pop_front() {
                    Some(QueueEntry::Record(oldest)) => {
                        // the evicted entry is finished; the new one takes its slot
                        state.entries.push_back(QueueEntry::Record(record));
                        PushOutcome::Displaced(oldest)
                    }
                    Some(QueueEntry::Stop) => {
                        state.entries.push_front(QueueEntry::Stop);
                        PushOutcome::Rejected(record)
                    }
                    None => {
                        state.entries.push_back(QueueEntry::Record(record));
                        state.unfinished += 1;
                        PushOutcome::Inserted
                    }
                }
            }
        };
        if !matches!(outcome, PushOutcome::Rejected(_)) {
            self.not_empty.notify_one();
        }
        outcome
    }

    /// Insert at the tail, waiting for room
    ///
    /// Returns the record if `timeout` elapses first. Cancel-safe: dropping
    /// the future before it resolves leaves the queue untouched.
    pub async fn push_wait(&self, record: Record, timeout: Option<Duration>) -> Result<(), Record> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut record = record;
        loop {
            let notified = self.not_full.notified();
            record = match self.try_push(record) {
                Ok(()) => return Ok(()),
                Err(record) => record,
            };
            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        return self.try_push(record);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Append the stop sentinel, ignoring capacity
    pub fn push_stop(&self) {
        {
            let mut state = self.lock();
            state.entries.push_back(QueueEntry::Stop);
            state.unfinished += 1;
        }
        self.not_empty.notify_one();
    }

    /// Pop the head entry, waiting at most `wait`
    pub async fn pop_timeout(&self, wait: Duration) -> Option<QueueEntry> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.not_empty.notified();
            if let Some(entry) = self.try_pop() {
                return Some(entry);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    fn try_pop(&self) -> Option<QueueEntry> {
        let entry = self.lock().entries.pop_front();
        if entry.is_some() {
            self.not_full.notify_one();
        }
        entry
    }

    /// Acknowledge one popped entry as processed
    pub fn task_done(&self) {
        self.finish(1);
    }

    /// Remove every queued entry, acknowledging them; returns dropped records
    pub fn discard_remaining(&self) -> usize {
        let discarded: Vec<QueueEntry> = {
            let mut state = self.lock();
            state.entries.drain(..).collect()
        };
        if discarded.is_empty() {
            return 0;
        }
        self.finish(discarded.len());
        self.not_full.notify_waiters();
        discarded
            .iter()
            .filter(|entry| matches!(entry, QueueEntry::Record(_)))
            .count()
    }

    fn finish(&self, count: usize) {
        let drained = {
            let mut state = self.lock();
            state.unfinished = state.unfinished.saturating_sub(count);
            state.unfinished == 0
        };
        if drained {
            self.all_done.notify_waiters();
        }
    }

    /// Wait until every pushed entry has been acknowledged
    pub async fn join(&self) {
        loop {
            let notified = self.all_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }
}

/// Acknowledges a popped entry when dropped, including during unwinding
pub(crate) struct InFlight<'a> {
    queue: &'a SinkQueue,
}

impl<'a> InFlight<'a> {
    pub(crate) fn new(queue: &'a SinkQueue) -> Self {
        Self { queue }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.task_done();
    }
}
