//! Sink metrics for observability

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use observability::DropReason;
use serde::Serialize;

/// Metrics for a single sink
///
/// Counters only grow. The enqueue path writes `enqueued`/`dropped`, the
/// sink's worker writes everything else.
#[derive(Debug)]
pub struct SinkMetrics {
    /// Sink name, used as the Prometheus label
    name: String,
    /// Records accepted into the queue
    enqueued: AtomicU64,
    /// Records published successfully
    sent: AtomicU64,
    /// Records never delivered (evicted, rejected, abandoned at shutdown)
    dropped: AtomicU64,
    /// Failed publish attempts
    errors: AtomicU64,
    /// Successful connection handshakes
    reconnects: AtomicU64,
    /// Whether the sink is currently connected
    connected: AtomicBool,
    /// Current reconnect backoff in milliseconds
    backoff_ms: AtomicU64,
    /// Most recent failure text
    last_error: Mutex<Option<String>>,
}

impl SinkMetrics {
    /// Create new metrics instance
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enqueued: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            backoff_ms: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        observability::record_enqueued(&self.name);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn inc_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        observability::record_sent(&self.name);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn add_dropped(&self, count: u64, reason: DropReason) {
        if count == 0 {
            return;
        }
        self.dropped.fetch_add(count, Ordering::Relaxed);
        observability::record_dropped(&self.name, reason, count);
    }

    pub fn inc_dropped(&self, reason: DropReason) {
        self.add_dropped(1, reason);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Count a failed attempt and remember its text
    pub fn record_error(&self, class: &'static str, message: String) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        observability::record_publish_error(&self.name, class);
        self.set_last_error(Some(message));
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Flip the connected flag; a transition to connected counts a reconnect
    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::Relaxed);
        if was != connected {
            if connected {
                self.reconnects.fetch_add(1, Ordering::Relaxed);
                observability::record_reconnect(&self.name);
            }
            observability::record_connection(&self.name, connected);
        }
    }

    /// Sinks without a handshake are connected from the start
    pub fn mark_always_connected(&self) {
        self.connected.store(true, Ordering::Relaxed);
        observability::record_connection(&self.name, true);
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms.load(Ordering::Relaxed))
    }

    pub fn set_backoff(&self, backoff: Duration) {
        let millis = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self.backoff_ms.store(millis, Ordering::Relaxed);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_last_error(&self, message: Option<String>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = message;
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self, queued: usize) -> SinkCounters {
        SinkCounters {
            queued,
            enqueued: self.enqueued(),
            sent: self.sent(),
            dropped: self.dropped(),
            errors: self.errors(),
            reconnects: self.reconnects(),
            connected: self.is_connected(),
            last_error: self.last_error(),
            backoff: self.backoff(),
        }
    }
}

/// Point-in-time view of a sink's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkCounters {
    /// Records currently waiting in the queue
    pub queued: usize,
    pub enqueued: u64,
    pub sent: u64,
    pub dropped: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub connected: bool,
    pub last_error: Option<String>,
    /// Current reconnect backoff
    #[serde(rename = "backoff_secs", serialize_with = "serialize_secs")]
    pub backoff: Duration,
}

fn serialize_secs<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}
