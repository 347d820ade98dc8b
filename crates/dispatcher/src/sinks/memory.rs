//! MemorySink - in-process buffer of delivered records

use std::sync::{Arc, Mutex, PoisonError};

use contracts::{FanoutSink, Record, SinkError};
use tracing::trace;

/// Sink that keeps every delivered record in memory
///
/// Stands in for an in-process consumer. Read the buffer through a
/// [`MemorySinkReader`] obtained before the sink is handed to the dispatcher.
pub struct MemorySink {
    name: String,
    buffer: Arc<Mutex<Vec<Record>>>,
}

/// Cloneable read side of a [`MemorySink`]
#[derive(Debug, Clone)]
pub struct MemorySinkReader {
    buffer: Arc<Mutex<Vec<Record>>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn reader(&self) -> MemorySinkReader {
        MemorySinkReader {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl MemorySinkReader {
    /// Copy of every record delivered so far
    pub fn records(&self) -> Vec<Record> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the buffered records, leaving the buffer empty
    pub fn drain(&self) -> Vec<Record> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl FanoutSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, record: &Record) -> Result<(), SinkError> {
        trace!(sink = %self.name, destination = %record.destination, "Buffered");
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
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
