//! Layered error definitions
//!
//! Categorized by source: config / sink

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for configuration and sink construction
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Sink Errors =====
    /// Sink could not be built from its parameters
    #[error("sink '{sink_name}' creation error: {message}")]
    SinkCreation { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create sink creation error
    pub fn sink_creation(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}

/// Coarse category of a sink operation failure.
///
/// Sinks tag every error with a kind; the per-sink classifier decides which
/// kinds are worth a reconnect-and-retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkErrorKind {
    /// Connection refused, reset or lost
    Connection,
    /// Operation timed out
    Timeout,
    /// Peer closed the write side
    BrokenPipe,
    /// Any other I/O failure
    Io,
    /// Readiness check reported the sink as unusable
    NotReady,
    /// Payload could not be framed for the wire
    Serialization,
    /// Sink refused the record
    Rejected,
    /// Anything else
    Other,
}

impl SinkErrorKind {
    /// Kinds treated as transient when a sink does not configure its own set
    pub const DEFAULT_RECOVERABLE: [SinkErrorKind; 4] = [
        SinkErrorKind::Connection,
        SinkErrorKind::Timeout,
        SinkErrorKind::BrokenPipe,
        SinkErrorKind::Io,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::BrokenPipe => "broken_pipe",
            Self::Io => "io",
            Self::NotReady => "not_ready",
            Self::Serialization => "serialization",
            Self::Rejected => "rejected",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for SinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a sink's publish / connect / readiness / close operation
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct SinkError {
    kind: SinkErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SinkError {
    /// Create an error of the given kind
    pub fn new(kind: SinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Timeout, message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::NotReady, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Serialization, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Rejected, message)
    }

    /// Error category
    pub fn kind(&self) -> SinkErrorKind {
        self.kind
    }

    /// Human readable detail
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for SinkError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable => SinkErrorKind::Connection,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => SinkErrorKind::Timeout,
            io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => SinkErrorKind::BrokenPipe,
            _ => SinkErrorKind::Io,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_onto_kinds() {
        let refused = SinkError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(refused.kind(), SinkErrorKind::Connection);

        let pipe = SinkError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(pipe.kind(), SinkErrorKind::BrokenPipe);

        let denied = SinkError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.kind(), SinkErrorKind::Io);
    }

    #[test]
    fn display_carries_kind_and_message() {
        let err = SinkError::rejected("schema mismatch");
        assert_eq!(err.to_string(), "rejected: schema mismatch");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&SinkErrorKind::BrokenPipe).unwrap();
        assert_eq!(json, "\"broken_pipe\"");
    }
}
