//! SinkHandle - manages a sink with isolated queue and worker task

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    Capabilities, DropPolicy, ErrorClassifier, FanoutSink, Record, SinkError, SinkPolicy,
};
use observability::DropReason;

use crate::metrics::{SinkCounters, SinkMetrics};
use crate::queue::{PushOutcome, SinkQueue};
use crate::worker::SinkWorker;

/// Delivery settings of one sink
#[derive(Debug, Clone, Default)]
pub struct SinkSettings {
    pub policy: SinkPolicy,
    pub classifier: ErrorClassifier,
}

impl SinkSettings {
    /// Settings whose classifier follows the policy's recoverable kinds
    pub fn from_policy(policy: SinkPolicy) -> Self {
        let classifier = policy.classifier();
        Self { policy, classifier }
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

type CloseFuture = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send>>;
type CloseHook = Box<dyn FnOnce() -> CloseFuture + Send>;
type Launcher = Box<dyn FnOnce() -> JoinHandle<()> + Send>;

/// Handle to a sink worker
///
/// The queue and counters outlive any single worker task: a worker that
/// panics is replaced on the same queue.
pub struct SinkHandle {
    /// Sink name
    name: String,
    /// Declared optional operations
    capabilities: Capabilities,
    /// Bounded FIFO feeding the worker
    queue: Arc<SinkQueue>,
    /// Shared metrics
    metrics: Arc<SinkMetrics>,
    /// Spawns the worker; taken by `start`
    launcher: Mutex<Option<Launcher>>,
    /// Worker task handle
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    /// Runs the sink's close operation; taken on first use
    close_hook: Mutex<Option<CloseHook>>,
}

impl SinkHandle {
    /// Create a handle without starting its worker
    pub fn new<S>(sink: S, settings: SinkSettings, shutdown: CancellationToken) -> Self
    where
        S: FanoutSink + Send + Sync + 'static,
    {
        let name = sink.name().to_string();
        let capabilities = sink.capabilities();
        let sink = Arc::new(sink);
        let queue = Arc::new(SinkQueue::new(settings.policy.queue_capacity));
        let metrics = Arc::new(SinkMetrics::new(&name));

        let launcher: Launcher = {
            let sink = Arc::clone(&sink);
            let queue = Arc::clone(&queue);
            let metrics = Arc::clone(&metrics);
            Box::new(move || {
                tokio::spawn(supervise_worker(sink, queue, metrics, settings, shutdown))
            })
        };
        let close_hook: CloseHook =
            Box::new(move || -> CloseFuture { Box::pin(async move { sink.close().await }) });

        Self {
            name,
            capabilities,
            queue,
            metrics,
            launcher: Mutex::new(Some(launcher)),
            worker_handle: Mutex::new(None),
            close_hook: Mutex::new(Some(close_hook)),
        }
    }

    /// Create a SinkHandle and spawn the worker task
    pub fn spawn<S>(sink: S, settings: SinkSettings, shutdown: CancellationToken) -> Self
    where
        S: FanoutSink + Send + Sync + 'static,
    {
        let handle = Self::new(sink, settings, shutdown);
        handle.start();
        handle
    }

    /// Spawn the worker task; no-op if already started
    pub fn start(&self) {
        let launcher = self
            .launcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(launch) = launcher {
            let task = launch();
            *self
                .worker_handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(task);
            debug!(sink = %self.name, "Sink worker spawned");
        }
    }

    /// Get sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Records waiting in the queue, oldest first
    pub fn queued_records(&self) -> Vec<Record> {
        self.queue.records()
    }

    /// Snapshot of this sink's counters
    pub fn counters(&self) -> SinkCounters {
        let queued = self.queue.len();
        observability::record_queue_depth(&self.name, queued);
        self.metrics.snapshot(queued)
    }

    /// Offer a record to the queue under the given overload policy
    ///
    /// Returns true if the record was queued. A full queue is a drop, never
    /// an error.
    pub async fn enqueue(
        &self,
        record: Record,
        policy: DropPolicy,
        block_timeout: Option<Duration>,
        shutdown: &CancellationToken,
    ) -> bool {
        let accepted = match policy {
            DropPolicy::DropOldest => match self.queue.push_displacing(record) {
                PushOutcome::Inserted => true,
                PushOutcome::Displaced(evicted) => {
                    debug!(
                        sink = %self.name,
                        destination = %evicted.destination,
                        "Queue full, oldest record evicted"
                    );
                    self.metrics.inc_dropped(DropReason::Evicted);
                    true
                }
                PushOutcome::Rejected(_) => {
                    self.metrics.inc_dropped(DropReason::Shutdown);
                    return false;
                }
            },
            DropPolicy::DropNewest => self.queue.try_push(record).is_ok(),
            DropPolicy::Block => {
                tokio::select! {
                    biased;
                    pushed = self.queue.push_wait(record, block_timeout) => pushed.is_ok(),
                    _ = shutdown.cancelled() => false,
                }
            }
        };

        if accepted {
            self.metrics.inc_enqueued();
        } else {
            debug!(sink = %self.name, policy = ?policy, "Queue full, record dropped");
            self.metrics.inc_dropped(DropReason::QueueFull);
        }
        accepted
    }

    /// Append the stop marker; the worker exits once it reaches it
    pub fn stop(&self) {
        self.queue.push_stop();
    }

    /// Wait until the queue is drained and the worker has exited
    ///
    /// Also returns when the worker task ends first (a shutdown exit that
    /// never reached the stop marker); whatever is still queued is then
    /// dropped.
    #[instrument(name = "sink_handle_join", skip(self), fields(sink = %self.name))]
    pub async fn join_drained(&self) {
        let worker = self
            .worker_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut worker) = worker else {
            self.queue.join().await;
            return;
        };

        let exited_early = tokio::select! {
            _ = self.queue.join() => None,
            finished = &mut worker => Some(finished),
        };
        let finished = match exited_early {
            Some(finished) => {
                let abandoned = self.queue.discard_remaining();
                if abandoned > 0 {
                    warn!(
                        sink = %self.name,
                        abandoned,
                        "Worker exited before draining its queue"
                    );
                    self.metrics.add_dropped(abandoned as u64, DropReason::Shutdown);
                }
                finished
            }
            None => worker.await,
        };
        if let Err(e) = finished {
            error!(sink = %self.name, error = ?e, "Worker supervisor task failed");
        }
    }

    /// Invoke the sink's close operation, at most once
    ///
    /// Only called when the sink declares `close`. Errors, panics and an
    /// expired `limit` are logged and swallowed; a close that outlives its
    /// limit keeps running detached.
    #[instrument(name = "sink_handle_close", skip(self), fields(sink = %self.name))]
    pub async fn close_sink(&self, limit: Option<Duration>) {
        if !self.capabilities.close {
            return;
        }
        let hook = self
            .close_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(hook) = hook else {
            return;
        };

        let task = tokio::spawn(hook());
        let joined = match limit {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        sink = %self.name,
                        timeout_ms = limit.as_millis() as u64,
                        "Sink close timed out"
                    );
                    return;
                }
            },
            None => task.await,
        };
        match joined {
            Ok(Ok(())) => info!(sink = %self.name, "Sink closed"),
            Ok(Err(e)) => warn!(sink = %self.name, error = %e, "Sink close failed"),
            Err(e) => error!(sink = %self.name, error = ?e, "Sink close panicked"),
        }
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

/// Run workers on the sink's queue, replacing any that panic
async fn supervise_worker<S>(
    sink: Arc<S>,
    queue: Arc<SinkQueue>,
    metrics: Arc<SinkMetrics>,
    settings: SinkSettings,
    shutdown: CancellationToken,
) where
    S: FanoutSink + Send + Sync + 'static,
{
    loop {
        let worker = SinkWorker::new(
            Arc::clone(&sink),
            Arc::clone(&queue),
            Arc::clone(&metrics),
            settings.policy.clone(),
            settings.classifier.clone(),
            shutdown.clone(),
        );

        match tokio::spawn(worker.run()).await {
            Ok(exit) => {
                debug!(sink = %metrics.name(), exit = ?exit, "Sink worker finished");
                return;
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(sink = %metrics.name(), panic = %message, "Sink worker panicked, restarting");
                metrics.record_error("panic", format!("panic: {message}"));
            }
            Err(e) => {
                warn!(sink = %metrics.name(), error = %e, "Sink worker cancelled");
                return;
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
