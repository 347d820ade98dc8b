//! LogSink - logs record summary via tracing

use contracts::{FanoutSink, Record, SinkError};
use tracing::{info, instrument};

/// Sink that logs record summaries for debugging
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_record_summary(&self, record: &Record) {
        info!(
            sink = %self.name,
            destination = %record.destination,
            bytes = record.len(),
            "Record received"
        );
    }
}

impl FanoutSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_publish",
        skip(self, record),
        fields(sink = %self.name, destination = %record.destination)
    )]
    async fn publish(&self, record: &Record) -> Result<(), SinkError> {
        self.log_record_summary(record);
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

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Capabilities;

    #[tokio::test]
    async fn test_log_sink_publish() {
        let sink = LogSink::new("test_log");
        let record = Record::new("trades", "AAPL,189.5,100");

        let result = sink.publish(&record).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_log_sink_is_publish_only() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
        assert_eq!(sink.capabilities(), Capabilities::publish_only());
    }
}
