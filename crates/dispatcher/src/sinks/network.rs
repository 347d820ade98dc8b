//! NetworkSink - TCP streaming with lazy connect

use contracts::{Capabilities, ContractError, FanoutSink, Record, SinkError};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Serialization format for network transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkFormat {
    /// Newline-delimited JSON envelope (UTF-8 payloads only)
    #[default]
    Json,
    /// Bincode record behind a u32 big-endian length prefix
    Bincode,
}

/// Configuration for NetworkSink
#[derive(Debug, Clone)]
pub struct NetworkSinkConfig {
    /// Target address
    pub addr: SocketAddr,
    /// Serialization format
    pub format: NetworkFormat,
    /// Largest encoded record accepted
    pub max_frame_size: usize,
    /// Connect attempt timeout
    pub connect_timeout: Duration,
}

impl NetworkSinkConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            format: NetworkFormat::Json,
            max_frame_size: 16 * 1024 * 1024,
            connect_timeout: Duration::from_secs(2),
        }
    }

    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let addr_str = params
            .get("addr")
            .ok_or_else(|| "missing 'addr' parameter".to_string())?;

        let addr: SocketAddr = addr_str
            .parse()
            .map_err(|e| format!("invalid address '{}': {}", addr_str, e))?;

        let format = match params.get("format").map(String::as_str) {
            Some("bincode") => NetworkFormat::Bincode,
            Some("json") | None => NetworkFormat::Json,
            Some(other) => return Err(format!("unknown format '{}'", other)),
        };

        let mut config = Self::new(addr);
        config.format = format;
        if let Some(size) = params.get("max_frame_size") {
            config.max_frame_size = size
                .parse()
                .map_err(|e| format!("invalid max_frame_size '{}': {}", size, e))?;
        }
        if let Some(ms) = params.get("connect_timeout_ms") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| format!("invalid connect_timeout_ms '{}': {}", ms, e))?;
            config.connect_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

#[derive(Serialize)]
struct JsonEnvelope<'a> {
    destination: &'a str,
    payload: &'a str,
}

/// Sink that streams records to a TCP peer
///
/// The connection is opened by `connect`, not at construction. A failed
/// write drops the stream so the next readiness check reports not ready.
/// The stream is taken out of its slot while a write is in flight; `close`
/// aborts that write instead of waiting on a peer that stopped reading.
pub struct NetworkSink {
    name: String,
    config: NetworkSinkConfig,
    stream: Mutex<Option<TcpStream>>,
    closing: CancellationToken,
}

impl NetworkSink {
    /// Create a new NetworkSink (not connected)
    pub fn new(name: impl Into<String>, config: NetworkSinkConfig) -> Self {
        Self {
            name: name.into(),
            config,
            stream: Mutex::new(None),
            closing: CancellationToken::new(),
        }
    }

    /// Create from params (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = NetworkSinkConfig::from_params(params)
            .map_err(|e| ContractError::sink_creation(&name, e))?;
        Ok(Self::new(name, config))
    }

    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    fn encode(&self, record: &Record) -> Result<Vec<u8>, SinkError> {
        let data = match self.config.format {
            NetworkFormat::Json => {
                let payload = std::str::from_utf8(&record.payload).map_err(|e| {
                    SinkError::serialization("json envelope needs a UTF-8 payload").with_source(e)
                })?;
                let envelope = JsonEnvelope {
                    destination: &record.destination,
                    payload,
                };
                let mut data = serde_json::to_vec(&envelope)
                    .map_err(|e| SinkError::serialization("json error").with_source(e))?;
                data.push(b'\n');
                data
            }
            NetworkFormat::Bincode => {
                let body = bincode::serialize(record)
                    .map_err(|e| SinkError::serialization("bincode error").with_source(e))?;
                let len = u32::try_from(body.len())
                    .map_err(|_| SinkError::rejected("record exceeds u32 length prefix"))?;
                let mut data = Vec::with_capacity(body.len() + 4);
                data.extend_from_slice(&len.to_be_bytes());
                data.extend_from_slice(&body);
                data
            }
        };

        if data.len() > self.config.max_frame_size {
            warn!(
                sink = %self.name,
                size = data.len(),
                max = self.config.max_frame_size,
                "Record too large, rejected"
            );
            return Err(SinkError::rejected(format!(
                "encoded record is {} bytes, max {}",
                data.len(),
                self.config.max_frame_size
            )));
        }
        Ok(data)
    }
}

impl FanoutSink for NetworkSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    #[instrument(
        name = "network_sink_publish",
        skip(self, record),
        fields(sink = %self.name, destination = %record.destination)
    )]
    async fn publish(&self, record: &Record) -> Result<(), SinkError> {
        let data = self.encode(record)?;

        let mut stream = self
            .stream
            .lock()
            .await
            .take()
            .ok_or_else(|| SinkError::connection("not connected"))?;

        let written = tokio::select! {
            res = stream.write_all(&data) => res,
            _ = self.closing.cancelled() => {
                return Err(SinkError::connection("sink closed during write"));
            }
        };
        // on error the stream is dropped here, forcing a reconnect
        written?;

        if !self.closing.is_cancelled() {
            *self.stream.lock().await = Some(stream);
        }
        debug!(sink = %self.name, bytes = data.len(), "Sent");
        Ok(())
    }

    #[instrument(name = "network_sink_connect", skip(self), fields(sink = %self.name))]
    async fn connect(&self) -> Result<(), SinkError> {
        if self.closing.is_cancelled() {
            return Err(SinkError::connection("sink closed"));
        }
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| SinkError::timeout(format!("connect to {} timed out", self.config.addr)))??;
        stream.set_nodelay(true)?;

        *self.stream.lock().await = Some(stream);
        debug!(sink = %self.name, target = %self.config.addr, "NetworkSink connected");
        Ok(())
    }

    async fn is_ready(&self) -> Result<bool, SinkError> {
        Ok(self.stream.lock().await.is_some())
    }

    #[instrument(name = "network_sink_close", skip(self), fields(sink = %self.name))]
    async fn close(&self) -> Result<(), SinkError> {
        self.closing.cancel();
        if let Some(mut stream) = self.stream.lock().await.take() {
            stream.shutdown().await?;
        }
        debug!(sink = %self.name, "NetworkSink closed");
        Ok(())
    }
}
