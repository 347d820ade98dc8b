//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置文件 -> Dispatcher -> sink 的完整链路
//! - 慢 sink 隔离与关闭语义
//! - 真实 TCP 连接的延迟连接与重连

#[cfg(test)]
mod config_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{DropPolicy, SinkErrorKind, SinkType};

    #[test]
    fn test_full_config_parses() {
        let blueprint = ConfigLoader::load_from_str(
            r#"
            [dispatch]
            drop_policy = "block"
            block_timeout_ms = 250
            close_timeout_ms = 1000

            [[sinks]]
            name = "tp"
            sink_type = "network"
            queue_capacity = 64
            retry_times = 2
            recoverable = ["connection", "broken_pipe"]
            requeue_on_failure = true
            params = { addr = "127.0.0.1:5010", format = "bincode" }

            [[sinks]]
            name = "console"
            sink_type = "log"
            "#,
            ConfigFormat::Toml,
        )
        .unwrap();

        assert_eq!(blueprint.dispatch.drop_policy, DropPolicy::Block);
        assert_eq!(blueprint.dispatch.block_timeout_ms, Some(250));
        assert_eq!(blueprint.sinks.len(), 2);

        let tp = &blueprint.sinks[0];
        assert_eq!(tp.sink_type, SinkType::Network);
        assert_eq!(tp.policy.queue_capacity, 64);
        assert_eq!(tp.policy.attempts(), 3);
        assert!(tp.policy.requeue_on_failure);
        assert_eq!(
            tp.policy.recoverable,
            vec![SinkErrorKind::Connection, SinkErrorKind::BrokenPipe]
        );

        // unset policy fields fall back to defaults
        let console = &blueprint.sinks[1];
        assert_eq!(console.policy, contracts::SinkPolicy::default());
    }

    #[test]
    fn test_duplicate_sink_names_rejected() {
        let err = ConfigLoader::load_from_str(
            r#"
            [[sinks]]
            name = "a"
            sink_type = "log"

            [[sinks]]
            name = "a"
            sink_type = "memory"
            "#,
            ConfigFormat::Toml,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"), "got: {err}");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{DispatchConfig, DropPolicy, Record, SinkError, SinkPolicy};
    use dispatcher::{create_dispatcher, DispatcherBuilder, FanoutSink, MemorySink, SinkSettings};
    use tokio::sync::Semaphore;

    /// Sink whose publish waits for a permit, to stand in for a slow peer
    struct GatedSink {
        name: String,
        gate: Arc<Semaphore>,
        delivered: Arc<Mutex<Vec<Record>>>,
    }

    impl FanoutSink for GatedSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn publish(&self, record: &Record) -> Result<(), SinkError> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| SinkError::connection("gate closed"))?;
            permit.forget();
            self.delivered.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn connect(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn is_ready(&self) -> Result<bool, SinkError> {
            Ok(true)
        }

        async fn close(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Config file -> create_dispatcher -> file archive on disk
    #[tokio::test]
    async fn test_config_to_file_archive() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("archive");
        let config = format!(
            r#"
            [dispatch]
            drop_policy = "block"

            [[sinks]]
            name = "archive"
            sink_type = "file"
            params = {{ base_path = '{}' }}

            [[sinks]]
            name = "console"
            sink_type = "log"
            "#,
            base.display()
        );
        let blueprint = ConfigLoader::load_from_str(&config, ConfigFormat::Toml).unwrap();
        let dispatcher = create_dispatcher(&blueprint).unwrap();

        dispatcher.publish("trades", "AAPL,189.5,100").await;
        dispatcher.publish("quotes", "AAPL,189.4,189.6").await;
        dispatcher.publish("trades", "MSFT,411.2,50").await;
        dispatcher.close(true, Some(Duration::from_secs(5))).await;

        let day = chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string();
        let trades = std::fs::read_to_string(base.join(&day).join("trades.log")).unwrap();
        assert_eq!(trades, "AAPL,189.5,100\nMSFT,411.2,50\n");
        let quotes = std::fs::read_to_string(base.join(&day).join("quotes.log")).unwrap();
        assert_eq!(quotes, "AAPL,189.4,189.6\n");

        let counters = dispatcher.counters();
        assert_eq!(counters["archive"].sent, 3);
        assert_eq!(counters["console"].sent, 3);
        assert_eq!(counters["archive"].dropped, 0);
    }

    /// A stalled sink drops its own overflow while the others receive everything
    #[tokio::test]
    async fn test_stalled_sink_is_isolated() {
        let memory = MemorySink::new("memory");
        let reader = memory.reader();

        let gate = Arc::new(Semaphore::new(0));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let gated = GatedSink {
            name: "slow".to_string(),
            gate: gate.clone(),
            delivered: delivered.clone(),
        };

        let slow_policy = SinkPolicy {
            queue_capacity: 2,
            ..SinkPolicy::default()
        };
        let dispatcher = DispatcherBuilder::new(DispatchConfig {
            drop_policy: DropPolicy::DropNewest,
            ..DispatchConfig::default()
        })
        .with_sink(memory, SinkSettings::default())
        .with_sink(gated, SinkSettings::from_policy(slow_policy))
        .build()
        .unwrap();

        // let the slow worker take the first record off its queue
        dispatcher.publish("t", "0").await;
        let slow = dispatcher.handle("slow").unwrap();
        wait_until(|| slow.queue_len() == 0).await;

        for i in 1..6 {
            dispatcher.publish("t", i.to_string()).await;
        }
        wait_until(|| reader.len() == 6).await;

        let counters = slow.counters();
        assert_eq!(counters.queued, 2);
        assert_eq!(counters.dropped, 3);

        gate.add_permits(16);
        dispatcher.close(true, Some(Duration::from_secs(5))).await;

        let payloads: Vec<_> = delivered
            .lock()
            .unwrap()
            .iter()
            .map(|r| String::from_utf8(r.payload.to_vec()).unwrap())
            .collect();
        assert_eq!(payloads, vec!["0", "1", "2"]);

        let counters = dispatcher.counters();
        assert_eq!(counters["memory"].sent, 6);
        assert_eq!(counters["memory"].dropped, 0);
        assert_eq!(counters["slow"].sent, 3);
        assert_eq!(counters["slow"].dropped, 3);
    }

    /// close() without waiting returns at once and rejects later publishes
    #[tokio::test]
    async fn test_close_without_wait_stops_intake() {
        let gate = Arc::new(Semaphore::new(0));
        let gated = GatedSink {
            name: "slow".to_string(),
            gate: gate.clone(),
            delivered: Arc::new(Mutex::new(Vec::new())),
        };

        let dispatcher = DispatcherBuilder::new(DispatchConfig::default())
            .with_sink(gated, SinkSettings::default())
            .build()
            .unwrap();

        for i in 0..4 {
            dispatcher.publish("t", i.to_string()).await;
        }
        dispatcher.close(false, None).await;
        assert!(dispatcher.is_closed());

        // unblock the in-flight record so the worker reaches the stop marker
        gate.add_permits(16);
        let slow = dispatcher.handle("slow").unwrap();
        wait_until(|| {
            let c = slow.counters();
            c.sent + c.dropped == 4
        })
        .await;

        dispatcher.publish("t", "late").await;
        assert_eq!(slow.counters().enqueued, 4);
    }
}

#[cfg(test)]
mod network_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use contracts::{DispatchConfig, SinkConfig, SinkPolicy, SinkType};
    use dispatcher::sinks::{NetworkFormat, NetworkSinkConfig};
    use dispatcher::{DispatcherBuilder, NetworkSink, SinkSettings};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn network_sink(addr: std::net::SocketAddr) -> SinkConfig {
        let mut params = HashMap::new();
        params.insert("addr".to_string(), addr.to_string());
        params.insert("connect_timeout_ms".to_string(), "200".to_string());
        SinkConfig {
            name: "tp".to_string(),
            sink_type: SinkType::Network,
            policy: SinkPolicy {
                reconnect_initial_ms: 20,
                reconnect_max_ms: 80,
                retry_backoff_ms: 10,
                ..SinkPolicy::default()
            },
            params,
        }
    }

    /// Records queued while the peer is down are delivered, in order, once it comes up
    #[tokio::test]
    async fn test_network_sink_connects_late() {
        // reserve a port, then free it so the first connects are refused
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let dispatcher = DispatcherBuilder::new(DispatchConfig::default())
            .with_sink_config(&network_sink(addr))
            .unwrap()
            .build()
            .unwrap();

        for i in 0..3 {
            dispatcher.publish("ticks", format!("tick-{i}")).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let before = dispatcher.handle("tp").unwrap().counters();
        assert!(!before.connected);
        assert!(before.last_error.unwrap().starts_with("connect:"));

        let listener = TcpListener::bind(addr).await.unwrap();
        let (socket, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();

        let mut lines = BufReader::new(socket).lines();
        let mut received = Vec::new();
        for _ in 0..3 {
            let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert_eq!(value["destination"], "ticks");
            received.push(value["payload"].as_str().unwrap().to_string());
        }
        assert_eq!(received, vec!["tick-0", "tick-1", "tick-2"]);

        dispatcher.close(true, Some(Duration::from_secs(2))).await;
        let after = dispatcher.counters()["tp"].clone();
        assert_eq!(after.sent, 3);
        assert_eq!(after.reconnects, 1);
        assert_eq!(after.dropped, 0);
    }

    /// A peer that accepts but never reads must not hold close() past its deadline
    #[tokio::test]
    async fn test_close_with_stalled_peer_honours_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = NetworkSinkConfig::new(listener.local_addr().unwrap());
        config.format = NetworkFormat::Bincode;

        let dispatcher = DispatcherBuilder::new(DispatchConfig::default())
            .with_sink(NetworkSink::new("tp", config), SinkSettings::default())
            .build()
            .unwrap();

        let payload = vec![7u8; 1024 * 1024];
        for _ in 0..32 {
            dispatcher.publish("blobs", payload.clone()).await;
        }

        // hold the socket open without ever reading from it
        let (_peer, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        // let the kernel buffers fill so the writer stalls
        tokio::time::sleep(Duration::from_millis(200)).await;

        let closed = tokio::time::timeout(
            Duration::from_secs(3),
            dispatcher.close(true, Some(Duration::from_millis(200))),
        )
        .await;
        assert!(closed.is_ok(), "close hung past its timeout");
        assert!(dispatcher.is_closed());
        assert!(dispatcher.counters()["tp"].sent < 32);
    }
}
