//! # Dispatcher
//!
//! 扇出分发模块。
//!
//! 负责：
//! - 把每条 `Record` 复制到每个 sink 的有界队列
//! - 每个 sink 独立的 worker、连接管理与重试
//! - 隔离慢 sink，不阻塞生产者和其他 sink

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod queue;
pub mod sinks;
pub mod supervisor;
pub mod worker;

pub use contracts::{FanoutSink, Record};
pub use dispatcher::{create_dispatcher, DispatcherBuilder, FanoutDispatcher};
pub use error::DispatcherError;
pub use handle::{SinkHandle, SinkSettings};
pub use metrics::{SinkCounters, SinkMetrics};
pub use sinks::{FileSink, LogSink, MemorySink, MemorySinkReader, NetworkSink};
pub use supervisor::{ConnectionState, ConnectionSupervisor};
