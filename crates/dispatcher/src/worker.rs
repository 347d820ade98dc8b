//! SinkWorker - consumes one sink's queue and publishes with retry

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use contracts::{ErrorClassifier, FailureClass, FanoutSink, Record, SinkPolicy};
use observability::DropReason;

use crate::metrics::SinkMetrics;
use crate::queue::{InFlight, QueueEntry, SinkQueue};
use crate::supervisor::ConnectionSupervisor;

/// How long a worker waits on an empty queue before re-checking shutdown
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Why a worker loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Consumed the stop sentinel
    Stopped,
    /// Shutdown signalled and the queue ran empty
    Shutdown,
}

/// Per-sink consumer loop
pub struct SinkWorker<S> {
    sink: Arc<S>,
    queue: Arc<SinkQueue>,
    metrics: Arc<SinkMetrics>,
    supervisor: ConnectionSupervisor,
    policy: SinkPolicy,
    classifier: ErrorClassifier,
    shutdown: CancellationToken,
}

impl<S: FanoutSink + Send + Sync + 'static> SinkWorker<S> {
    pub fn new(
        sink: Arc<S>,
        queue: Arc<SinkQueue>,
        metrics: Arc<SinkMetrics>,
        policy: SinkPolicy,
        classifier: ErrorClassifier,
        shutdown: CancellationToken,
    ) -> Self {
        let supervisor = ConnectionSupervisor::new(
            sink.capabilities(),
            &policy,
            Arc::clone(&metrics),
            shutdown.clone(),
        );
        Self {
            sink,
            queue,
            metrics,
            supervisor,
            policy,
            classifier,
            shutdown,
        }
    }

    /// Run until the stop sentinel or shutdown with an empty queue
    #[instrument(name = "sink_worker_loop", skip(self), fields(sink = %self.metrics.name()))]
    pub async fn run(mut self) -> WorkerExit {
        debug!("Sink worker started");
        let queue = Arc::clone(&self.queue);

        loop {
            let Some(entry) = queue.pop_timeout(POLL_INTERVAL).await else {
                if self.shutdown.is_cancelled() && queue.is_empty() {
                    debug!("Sink worker stopped (shutdown)");
                    return WorkerExit::Shutdown;
                }
                continue;
            };
            let _in_flight = InFlight::new(&queue);

            match entry {
                QueueEntry::Stop => {
                    let abandoned = queue.discard_remaining();
                    if abandoned > 0 {
                        warn!(abandoned, "Records left behind the stop marker dropped");
                        self.metrics
                            .add_dropped(abandoned as u64, DropReason::Shutdown);
                    }
                    debug!("Sink worker stopped");
                    return WorkerExit::Stopped;
                }
                QueueEntry::Record(record) => self.deliver(record).await,
            }
        }
    }

    async fn deliver(&mut self, record: Record) {
        if !self.supervisor.ensure_connected(self.sink.as_ref()).await {
            debug!(destination = %record.destination, "Not connected during shutdown, record dropped");
            self.metrics.inc_dropped(DropReason::Shutdown);
            return;
        }

        let attempts = self.policy.attempts();
        let mut published = false;

        for attempt in 1..=attempts {
            let err = match self.sink.publish(&record).await {
                Ok(()) => {
                    self.metrics.inc_sent();
                    self.metrics.set_last_error(None);
                    published = true;
                    break;
                }
                Err(e) => e,
            };

            let class = self.classifier.classify(&err);
            self.metrics
                .record_error(class.as_str(), format!("{}: {err}", class.as_str()));

            match class {
                FailureClass::Fatal => {
                    error!(
                        destination = %record.destination,
                        attempt,
                        error = %err,
                        "Fatal publish error"
                    );
                    break;
                }
                FailureClass::Recoverable => {
                    warn!(
                        destination = %record.destination,
                        attempt,
                        attempts,
                        error = %err,
                        "Recoverable publish error, reconnecting"
                    );
                    self.supervisor.mark_disconnected();

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(self.policy.retry_backoff()) => {}
                    }
                    if !self.supervisor.ensure_connected(self.sink.as_ref()).await {
                        break;
                    }
                }
            }
        }

        if !published {
            self.requeue(record);
        }
    }

    fn requeue(&self, record: Record) {
        if !self.policy.requeue_on_failure {
            return;
        }
        if self.shutdown.is_cancelled() {
            self.metrics.inc_dropped(DropReason::Shutdown);
            return;
        }
        if let Err(record) = self.queue.try_push(record) {
            debug!(destination = %record.destination, "Queue full, requeue dropped");
            self.metrics.inc_dropped(DropReason::RequeueFull);
        }
    }
}
