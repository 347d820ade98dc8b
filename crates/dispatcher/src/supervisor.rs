//! ConnectionSupervisor - lazy connect and reconnect with exponential backoff

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use contracts::{Capabilities, FanoutSink, SinkPolicy};

use crate::metrics::SinkMetrics;

/// Lower bound on the reconnect delay, so a zero setting cannot spin
const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Connection lifecycle of one sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected yet
    Unconfigured,
    /// Reconnect loop in progress (or pending)
    Connecting,
    /// Usable
    Connected,
    /// Shutdown observed while not connected; terminal
    Stopped,
}

/// Owns the connection state of a single sink
///
/// Lives inside the sink's worker task; nothing else touches it.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    capabilities: Capabilities,
    state: ConnectionState,
    initial: Duration,
    max: Duration,
    backoff: Duration,
    metrics: Arc<SinkMetrics>,
    shutdown: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        capabilities: Capabilities,
        policy: &SinkPolicy,
        metrics: Arc<SinkMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        let initial = policy.reconnect_initial().max(MIN_BACKOFF);
        let max = policy.reconnect_max().max(initial);
        let state = if capabilities.needs_handshake() {
            metrics.set_connected(false);
            ConnectionState::Unconfigured
        } else {
            metrics.mark_always_connected();
            ConnectionState::Connected
        };
        metrics.set_backoff(initial);

        Self {
            capabilities,
            state,
            initial,
            max,
            backoff: initial,
            metrics,
            shutdown,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Make sure the sink is usable before a publish
    ///
    /// Returns `false` only when shutdown interrupted the reconnect loop.
    pub async fn ensure_connected<S: FanoutSink>(&mut self, sink: &S) -> bool {
        if !self.capabilities.needs_handshake() {
            return true;
        }

        match self.state {
            ConnectionState::Connected => {
                if !self.capabilities.ready {
                    return true;
                }
                match sink.is_ready().await {
                    Ok(true) => return true,
                    Ok(false) => {
                        debug!(sink = %self.metrics.name(), "Sink no longer ready");
                        self.metrics
                            .set_last_error(Some("is_ready: sink not ready".to_string()));
                    }
                    Err(e) => {
                        debug!(sink = %self.metrics.name(), error = %e, "Readiness check failed");
                        self.metrics.set_last_error(Some(format!("is_ready: {e}")));
                    }
                }
                self.mark_disconnected();
            }
            ConnectionState::Stopped => return false,
            ConnectionState::Unconfigured | ConnectionState::Connecting => {}
        }

        self.state = ConnectionState::Connecting;
        self.reconnect(sink).await
    }

    /// Force the next `ensure_connected` through a handshake
    ///
    /// No-op for sinks without connect/ready.
    pub fn mark_disconnected(&mut self) {
        if !self.capabilities.needs_handshake() {
            return;
        }
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Connecting;
            self.metrics.set_connected(false);
        }
    }

    async fn reconnect<S: FanoutSink>(&mut self, sink: &S) -> bool {
        loop {
            if self.shutdown.is_cancelled() {
                return self.stop();
            }

            match self.handshake(sink).await {
                Ok(()) => {
                    self.state = ConnectionState::Connected;
                    self.backoff = self.initial;
                    self.metrics.set_backoff(self.initial);
                    self.metrics.set_connected(true);
                    info!(
                        sink = %self.metrics.name(),
                        reconnects = self.metrics.reconnects(),
                        "Sink connected"
                    );
                    return true;
                }
                Err(message) => {
                    warn!(
                        sink = %self.metrics.name(),
                        backoff_ms = self.backoff.as_millis() as u64,
                        error = %message,
                        "Connect attempt failed"
                    );
                    self.metrics.set_last_error(Some(message));
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return self.stop(),
                _ = tokio::time::sleep(self.backoff) => {}
            }

            self.backoff = next_backoff(self.backoff, self.initial, self.max);
            self.metrics.set_backoff(self.backoff);
        }
    }

    async fn handshake<S: FanoutSink>(&self, sink: &S) -> Result<(), String> {
        if self.capabilities.connect {
            sink.connect().await.map_err(|e| format!("connect: {e}"))?;
        }
        if self.capabilities.ready {
            match sink.is_ready().await {
                Ok(true) => {}
                Ok(false) => return Err("is_ready: sink not ready".to_string()),
                Err(e) => return Err(format!("is_ready: {e}")),
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> bool {
        debug!(sink = %self.metrics.name(), "Shutdown during reconnect, giving up");
        self.state = ConnectionState::Stopped;
        false
    }
}

/// `min(max, max(initial, current * 2))`
pub fn next_backoff(current: Duration, initial: Duration, max: Duration) -> Duration {
    max.min(initial.max(current.saturating_mul(2)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Record, SinkError};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Sink whose handshake fails a fixed number of times
    struct FlakySink {
        capabilities: Capabilities,
        connect_failures: AtomicU32,
        connects: AtomicU32,
        ready: AtomicBool,
    }

    impl FlakySink {
        fn new(capabilities: Capabilities, connect_failures: u32) -> Self {
            Self {
                capabilities,
                connect_failures: AtomicU32::new(connect_failures),
                connects: AtomicU32::new(0),
                ready: AtomicBool::new(true),
            }
        }
    }

    impl FanoutSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        fn capabilities(&self) -> Capabilities {
            self.capabilities
        }

        async fn publish(&self, _record: &Record) -> Result<(), SinkError> {
            Ok(())
        }

        async fn connect(&self) -> Result<(), SinkError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let remaining = self.connect_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.connect_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(SinkError::connection("refused"));
            }
            Ok(())
        }

        async fn is_ready(&self) -> Result<bool, SinkError> {
            Ok(self.ready.load(Ordering::SeqCst))
        }

        async fn close(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn fast_policy() -> SinkPolicy {
        SinkPolicy {
            reconnect_initial_ms: 5,
            reconnect_max_ms: 20,
            ..SinkPolicy::default()
        }
    }

    fn supervisor(capabilities: Capabilities) -> (ConnectionSupervisor, Arc<SinkMetrics>, CancellationToken) {
        let metrics = Arc::new(SinkMetrics::new("flaky"));
        let token = CancellationToken::new();
        let sup = ConnectionSupervisor::new(
            capabilities,
            &fast_policy(),
            Arc::clone(&metrics),
            token.clone(),
        );
        (sup, metrics, token)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        assert_eq!(next_backoff(initial, initial, max), Duration::from_millis(200));
        assert_eq!(
            next_backoff(Duration::from_millis(400), initial, max),
            Duration::from_millis(500)
        );
        assert_eq!(next_backoff(Duration::ZERO, initial, max), initial);
    }

    #[tokio::test]
    async fn zero_initial_backoff_is_floored() {
        let caps = Capabilities::publish_only().with_connect();
        let sink = FlakySink::new(caps, 3);
        let policy = SinkPolicy {
            reconnect_initial_ms: 0,
            reconnect_max_ms: 0,
            ..SinkPolicy::default()
        };
        let metrics = Arc::new(SinkMetrics::new("flaky"));
        let mut sup =
            ConnectionSupervisor::new(caps, &policy, Arc::clone(&metrics), CancellationToken::new());

        assert_eq!(sup.backoff(), MIN_BACKOFF);
        assert_eq!(
            next_backoff(sup.backoff(), MIN_BACKOFF, Duration::from_millis(8)),
            Duration::from_millis(2)
        );

        let started = std::time::Instant::now();
        assert!(sup.ensure_connected(&sink).await);
        assert_eq!(sink.connects.load(Ordering::SeqCst), 4);
        // three failed handshakes each waited at least the floor
        assert!(started.elapsed() >= Duration::from_millis(3));
    }

    #[tokio::test]
    async fn publish_only_sink_is_always_connected() {
        let sink = FlakySink::new(Capabilities::publish_only(), 0);
        let (mut sup, metrics, _token) = supervisor(Capabilities::publish_only());

        assert_eq!(sup.state(), ConnectionState::Connected);
        assert!(sup.ensure_connected(&sink).await);
        sup.mark_disconnected();
        assert!(sup.ensure_connected(&sink).await);

        assert_eq!(sink.connects.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.reconnects(), 0);
        assert!(metrics.is_connected());
    }

    #[tokio::test]
    async fn retries_connect_until_success() {
        let caps = Capabilities::publish_only().with_connect();
        let sink = FlakySink::new(caps, 2);
        let (mut sup, metrics, _token) = supervisor(caps);

        assert_eq!(sup.state(), ConnectionState::Unconfigured);
        assert!(sup.ensure_connected(&sink).await);
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(sink.connects.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.reconnects(), 1);
        assert_eq!(sup.backoff(), Duration::from_millis(5));
        assert!(metrics.last_error().unwrap().starts_with("connect:"));
    }

    #[tokio::test]
    async fn not_ready_forces_reconnect() {
        let caps = Capabilities::all();
        let sink = FlakySink::new(caps, 0);
        let (mut sup, metrics, _token) = supervisor(caps);

        assert!(sup.ensure_connected(&sink).await);
        sink.ready.store(false, Ordering::SeqCst);

        // flips ready back after a couple of failed handshakes
        let flip = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            sink.ready.store(true, Ordering::SeqCst);
        };
        let (connected, ()) = tokio::join!(sup.ensure_connected(&sink), flip);

        assert!(connected);
        assert!(sink.connects.load(Ordering::SeqCst) >= 2);
        assert_eq!(metrics.reconnects(), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_reconnect_loop() {
        let caps = Capabilities::publish_only().with_connect();
        let sink = FlakySink::new(caps, u32::MAX);
        let (mut sup, metrics, token) = supervisor(caps);

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        };
        let (connected, ()) = tokio::join!(sup.ensure_connected(&sink), cancel);

        assert!(!connected);
        assert_eq!(sup.state(), ConnectionState::Stopped);
        assert!(!sup.ensure_connected(&sink).await);
        assert!(!metrics.is_connected());
    }

    #[tokio::test]
    async fn shutdown_keeps_connected_sink_usable() {
        let caps = Capabilities::publish_only().with_connect();
        let sink = FlakySink::new(caps, 0);
        let (mut sup, _metrics, token) = supervisor(caps);

        assert!(sup.ensure_connected(&sink).await);
        token.cancel();
        assert!(sup.ensure_connected(&sink).await);
        assert_eq!(sink.connects.load(Ordering::SeqCst), 1);
    }
}
