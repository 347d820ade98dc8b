//! Dispatcher - fans each published record out to every sink queue

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use contracts::{DispatchConfig, FanoutBlueprint, FanoutSink, Record, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::handle::{SinkHandle, SinkSettings};
use crate::metrics::SinkCounters;
use crate::sinks::{FileSink, LogSink, MemorySink, NetworkSink};

/// Time each sink's close still gets once the close deadline has passed
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Builder for creating a FanoutDispatcher
pub struct DispatcherBuilder {
    config: DispatchConfig,
    shutdown: CancellationToken,
    handles: Vec<SinkHandle>,
}

impl DispatcherBuilder {
    /// Create a new DispatcherBuilder
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Add a programmatic sink
    pub fn with_sink<S>(mut self, sink: S, settings: SinkSettings) -> Self
    where
        S: FanoutSink + Send + Sync + 'static,
    {
        let handle = SinkHandle::new(sink, settings, self.shutdown.clone());
        self.handles.push(handle);
        self
    }

    /// Add a sink built from configuration
    pub fn with_sink_config(mut self, config: &SinkConfig) -> Result<Self, DispatcherError> {
        let handle = create_sink_handle(config, &self.shutdown)?;
        self.handles.push(handle);
        Ok(self)
    }

    /// Build and start the dispatcher
    ///
    /// Spawns one worker per sink, so it must run inside a tokio runtime.
    #[instrument(name = "dispatcher_builder_build", skip(self), fields(sink_count = self.handles.len()))]
    pub fn build(self) -> Result<FanoutDispatcher, DispatcherError> {
        let dispatcher = FanoutDispatcher::with_handles(self.handles, self.config, self.shutdown)?;
        for handle in &dispatcher.handles {
            handle.start();
        }
        info!(
            sinks = dispatcher.handles.len(),
            drop_policy = ?dispatcher.config.drop_policy,
            "Dispatcher started"
        );
        Ok(dispatcher)
    }
}

/// Create a SinkHandle from configuration
#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config, shutdown),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
fn create_sink_handle(
    config: &SinkConfig,
    shutdown: &CancellationToken,
) -> Result<SinkHandle, DispatcherError> {
    let settings = SinkSettings::from_policy(config.policy.clone());
    let shutdown = shutdown.clone();

    match config.sink_type {
        SinkType::Log => {
            let sink = LogSink::new(&config.name);
            Ok(SinkHandle::new(sink, settings, shutdown))
        }
        SinkType::Memory => {
            let sink = MemorySink::new(&config.name);
            Ok(SinkHandle::new(sink, settings, shutdown))
        }
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::new(sink, settings, shutdown))
        }
        SinkType::Network => {
            let sink = NetworkSink::from_params(&config.name, &config.params)?;
            Ok(SinkHandle::new(sink, settings, shutdown))
        }
    }
}

/// Fans every published record out to N independent sinks
///
/// Each sink has its own bounded queue and worker, so a slow or
/// disconnected sink never stalls the producer or the other sinks.
pub struct FanoutDispatcher {
    handles: Vec<SinkHandle>,
    config: DispatchConfig,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl FanoutDispatcher {
    /// Create a dispatcher with custom sink handles (for testing)
    ///
    /// Handles are used as given; ones created with `SinkHandle::new` stay
    /// paused until started.
    pub fn with_handles(
        handles: Vec<SinkHandle>,
        config: DispatchConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, DispatcherError> {
        let mut seen = HashSet::new();
        for handle in &handles {
            if !seen.insert(handle.name()) {
                return Err(DispatcherError::DuplicateSink {
                    name: handle.name().to_string(),
                });
            }
        }

        Ok(Self {
            handles,
            config,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Configured sink names, in registration order
    pub fn sink_names(&self) -> Vec<&str> {
        self.handles.iter().map(SinkHandle::name).collect()
    }

    pub fn handle(&self, name: &str) -> Option<&SinkHandle> {
        self.handles.iter().find(|h| h.name() == name)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Offer a record to every sink
    ///
    /// Never waits on sink connectivity. Only the `block` policy waits, and
    /// only for queue space.
    pub async fn publish(&self, destination: impl Into<String>, payload: impl Into<Bytes>) {
        self.publish_record(Record::new(destination, payload)).await;
    }

    pub async fn publish_record(&self, record: Record) {
        if self.is_closed() {
            debug!(destination = %record.destination, "Publish after close ignored");
            return;
        }

        let block_timeout = self.config.block_timeout();
        for handle in &self.handles {
            handle
                .enqueue(
                    record.clone(),
                    self.config.drop_policy,
                    block_timeout,
                    &self.shutdown,
                )
                .await;
        }
    }

    /// Per-sink counter snapshot
    pub fn counters(&self) -> BTreeMap<String, SinkCounters> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.counters()))
            .collect()
    }

    /// Stop the workers and close every sink
    ///
    /// With `wait`, queued records are drained first, bounded by `timeout`.
    /// A missed deadline is logged and the sinks are closed anyway; each
    /// close gets what is left of `timeout`, at least `CLOSE_GRACE`. Calling
    /// it again does nothing.
    #[instrument(name = "dispatcher_close", skip(self))]
    pub async fn close(&self, wait: bool, timeout: Option<Duration>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Dispatcher already closed");
            return;
        }

        info!(sinks = self.handles.len(), "Dispatcher shutting down");
        let deadline = timeout.map(|limit| tokio::time::Instant::now() + limit);
        // every stop marker is queued before the token fires
        for handle in &self.handles {
            handle.stop();
        }
        self.shutdown.cancel();

        if wait {
            let drain = async {
                for handle in &self.handles {
                    handle.join_drained().await;
                }
            };
            match timeout {
                Some(limit) => {
                    if tokio::time::timeout(limit, drain).await.is_err() {
                        warn!(
                            timeout_ms = limit.as_millis() as u64,
                            "Drain deadline missed, closing sinks anyway"
                        );
                    }
                }
                None => drain.await,
            }
        }

        for handle in &self.handles {
            let limit = deadline.map(|deadline| {
                deadline
                    .saturating_duration_since(tokio::time::Instant::now())
                    .max(CLOSE_GRACE)
            });
            handle.close_sink(limit).await;
        }

        info!("Dispatcher shutdown complete");
    }

    /// `close` with the configured wait flag and timeout
    pub async fn shutdown(&self) {
        self.close(self.config.wait_on_close, self.config.close_timeout())
            .await;
    }
}

impl Drop for FanoutDispatcher {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            for handle in &self.handles {
                handle.stop();
            }
            self.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for FanoutDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutDispatcher")
            .field("sinks", &self.sink_names())
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Convenience function to create a dispatcher from a blueprint
#[instrument(name = "dispatcher_create", skip(blueprint), fields(sinks = blueprint.sinks.len()))]
pub fn create_dispatcher(blueprint: &FanoutBlueprint) -> Result<FanoutDispatcher, DispatcherError> {
    let mut builder = DispatcherBuilder::new(blueprint.dispatch.clone());
    for sink_config in &blueprint.sinks {
        builder = builder.with_sink_config(sink_config)?;
    }
    builder.build()
}
