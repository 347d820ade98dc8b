//! FanoutSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for sinks together with the capability set
//! that tells the dispatcher which optional operations a sink supports.

use serde::Serialize;

use crate::{Record, SinkError};

/// Optional operations a sink supports beyond `publish`
///
/// Read once when the sink's worker starts. Operations that are not declared
/// are never called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// `connect` establishes the downstream connection
    pub connect: bool,
    /// `is_ready` reports whether the connection is usable
    pub ready: bool,
    /// `close` releases resources on shutdown
    pub close: bool,
}

impl Capabilities {
    /// Publish only: always connected, nothing to release
    pub const fn publish_only() -> Self {
        Self {
            connect: false,
            ready: false,
            close: false,
        }
    }

    /// Full connection lifecycle
    pub const fn all() -> Self {
        Self {
            connect: true,
            ready: true,
            close: true,
        }
    }

    pub const fn with_connect(mut self) -> Self {
        self.connect = true;
        self
    }

    pub const fn with_ready(mut self) -> Self {
        self.ready = true;
        self
    }

    pub const fn with_close(mut self) -> Self {
        self.close = true;
        self
    }

    /// Whether the sink has any connection handshake at all
    ///
    /// Sinks without one are considered permanently connected.
    pub const fn needs_handshake(&self) -> bool {
        self.connect || self.ready
    }
}

/// Data output trait
///
/// All sink implementations must implement this trait. Methods take `&self`
/// so the dispatcher can close a sink while its worker is still parked inside
/// a slow call. Implementations keep mutable state behind their own locks and
/// must not hold one across a call that can stall; `close` should abort or
/// skip in-flight work rather than wait on it. The dispatcher bounds each
/// `close` and abandons one that overruns.
#[trait_variant::make(FanoutSink: Send)]
pub trait LocalFanoutSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Optional operations this sink implements
    fn capabilities(&self) -> Capabilities {
        Capabilities::publish_only()
    }

    /// Deliver one record
    ///
    /// # Errors
    /// Returns a tagged error; its kind drives retry classification
    async fn publish(&self, record: &Record) -> Result<(), SinkError>;

    /// Establish the downstream connection (only called when declared)
    async fn connect(&self) -> Result<(), SinkError>;

    /// Report whether the connection is usable (only called when declared)
    async fn is_ready(&self) -> Result<bool, SinkError>;

    /// Release resources (only called when declared, at most once)
    async fn close(&self) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_only_needs_no_handshake() {
        assert!(!Capabilities::publish_only().needs_handshake());
        assert!(Capabilities::publish_only().with_ready().needs_handshake());
        assert!(Capabilities::default().with_connect().needs_handshake());
    }

    #[test]
    fn builder_sets_flags() {
        let caps = Capabilities::publish_only().with_connect().with_close();
        assert!(caps.connect);
        assert!(!caps.ready);
        assert!(caps.close);
        assert_eq!(Capabilities::all(), caps.with_ready());
    }
}
