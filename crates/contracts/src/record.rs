//! Record - Dispatcher input
//!
//! An opaque `(destination, payload)` pair handed over by the producer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Already-serialized record bound for a named destination
///
/// The dispatcher never looks inside either field. Clones share the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Destination identifier (table, topic, file stem...)
    pub destination: String,

    /// Serialized payload (zero-copy)
    pub payload: Bytes,
}

impl Record {
    /// Create a new record
    pub fn new(destination: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            destination: destination.into(),
            payload: payload.into(),
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
