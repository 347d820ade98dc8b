//! Mock Fanout Example
//!
//! Fans a synthetic tick stream out to an in-memory sink, a console sink and
//! a deliberately flaky sink that drops its connection every few records.
//! No network or files required.
//!
//! Run with: cargo run --bin mock_fanout

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use contracts::{
    Capabilities, DispatchConfig, DropPolicy, Record, SinkError, SinkErrorKind, SinkPolicy,
};
use dispatcher::{DispatcherBuilder, FanoutSink, LogSink, MemorySink, SinkSettings};
use observability::{LogFormat, ObservabilityConfig};
use tracing::info;

/// Loses its connection on every `fail_every`-th publish
struct FlakySink {
    fail_every: u64,
    published: AtomicU64,
    up: AtomicBool,
}

impl FlakySink {
    fn new(fail_every: u64) -> Self {
        Self {
            fail_every,
            published: AtomicU64::new(0),
            up: AtomicBool::new(false),
        }
    }
}

impl FanoutSink for FlakySink {
    fn name(&self) -> &str {
        "flaky"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::publish_only().with_connect().with_ready()
    }

    async fn publish(&self, record: &Record) -> Result<(), SinkError> {
        let n = self.published.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.fail_every == 0 {
            self.up.store(false, Ordering::Relaxed);
            return Err(SinkError::connection("peer hung up"));
        }
        tracing::debug!(destination = %record.destination, bytes = record.len(), "flaky: sent");
        Ok(())
    }

    async fn connect(&self) -> Result<(), SinkError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.up.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn is_ready(&self) -> Result<bool, SinkError> {
        Ok(self.up.load(Ordering::Relaxed))
    }

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (pretty, metrics exporter off)
    observability::init_with_config(ObservabilityConfig {
        log_format: LogFormat::Pretty,
        metrics_port: None,
        default_log_level: "info".to_string(),
    })?;

    info!("Starting Mock Fanout Demo");

    // ==== Stage 1: Build sinks ====
    let memory = MemorySink::new("memory");
    let reader = memory.reader();

    let flaky_policy = SinkPolicy {
        queue_capacity: 32,
        retry_times: 2,
        retry_backoff_ms: 10,
        reconnect_initial_ms: 10,
        reconnect_max_ms: 200,
        recoverable: vec![SinkErrorKind::Connection],
        requeue_on_failure: true,
    };

    // ==== Stage 2: Create dispatcher ====
    let dispatcher = DispatcherBuilder::new(DispatchConfig {
        drop_policy: DropPolicy::DropOldest,
        ..DispatchConfig::default()
    })
    .with_sink(memory, SinkSettings::default())
    .with_sink(LogSink::new("console"), SinkSettings::default())
    .with_sink(FlakySink::new(7), SinkSettings::from_policy(flaky_policy))
    .build()?;

    info!(sinks = ?dispatcher.sink_names(), "Dispatcher ready");

    // ==== Stage 3: Publish ====
    let target_records = 100u64;
    for i in 0..target_records {
        let destination = if i % 3 == 0 { "quotes" } else { "trades" };
        dispatcher
            .publish(destination, format!("tick-{i},{}", 100.0 + i as f64 * 0.25))
            .await;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // ==== Stage 4: Close and report ====
    dispatcher.close(true, Some(Duration::from_secs(5))).await;

    info!(memory_records = reader.len(), "Memory sink contents");
    for (name, counters) in dispatcher.counters() {
        info!(
            sink = %name,
            enqueued = counters.enqueued,
            sent = counters.sent,
            dropped = counters.dropped,
            errors = counters.errors,
            reconnects = counters.reconnects,
            last_error = ?counters.last_error,
            "Final counters"
        );
    }

    info!("Demo complete");
    Ok(())
}
