//! Sink implementations
//!
//! Contains LogSink, MemorySink, FileSink, and NetworkSink.

mod file;
mod log;
mod memory;
mod network;

pub use self::file::{FileSink, FileSinkConfig};
pub use self::log::LogSink;
pub use self::memory::{MemorySink, MemorySinkReader};
pub use self::network::{NetworkFormat, NetworkSink, NetworkSinkConfig};
