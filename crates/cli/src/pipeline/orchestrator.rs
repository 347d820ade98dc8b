//! Pipeline orchestrator - reads input lines and drives the dispatcher.

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{FanoutBlueprint, Record};
use dispatcher::FanoutDispatcher;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use super::PipelineStats;
use crate::error::{self, CliError};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The fanout blueprint configuration
    pub blueprint: FanoutBlueprint,

    /// Input file (None = stdin)
    pub input: Option<PathBuf>,

    /// Maximum number of records to publish (None = unlimited)
    pub max_records: Option<u64>,

    /// Run timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Interval between counter reports (None = disabled)
    pub report_interval: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until the input ends, a limit is reached or `shutdown` resolves
    ///
    /// The dispatcher is always closed before returning, so the returned
    /// counters are final.
    pub async fn run<F>(self, shutdown: F) -> Result<PipelineStats>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();

        // Initialize Metrics (optional)
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        if self.config.blueprint.sinks.is_empty() {
            warn!("No sinks configured - records will go nowhere");
        }

        let dispatcher = dispatcher::create_dispatcher(&self.config.blueprint)
            .context("Failed to create dispatcher")?;
        info!(sinks = ?dispatcher.sink_names(), "Dispatcher started");

        let reader = self.open_input().await?;
        let mut stats = PipelineStats::default();

        let result = self
            .pump(reader, &dispatcher, &mut stats, shutdown)
            .await;

        // Shutdown
        info!("Closing dispatcher...");
        dispatcher.shutdown().await;

        stats.duration = start_time.elapsed();
        stats.sinks = dispatcher.counters();

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            rps = format!("{:.2}", stats.rps()),
            dropped = stats.total_dropped(),
            "Pipeline shutdown complete"
        );

        result.map(|()| stats)
    }

    async fn open_input(&self) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
        match &self.config.input {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open input {}", path.display()))?;
                info!(input = %path.display(), "Reading records from file");
                Ok(Box::new(BufReader::new(file)))
            }
            None => {
                info!("Reading records from stdin");
                Ok(Box::new(BufReader::new(tokio::io::stdin())))
            }
        }
    }

    async fn pump<F>(
        &self,
        reader: Box<dyn AsyncBufRead + Unpin + Send>,
        dispatcher: &FanoutDispatcher,
        stats: &mut PipelineStats,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut lines = reader.lines();
        tokio::pin!(shutdown);

        let deadline = self.config.timeout.map(|t| tokio::time::Instant::now() + t);
        let timed_out = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timed_out);

        let mut ticker = self.config.report_interval.map(tokio::time::interval);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping input");
                    stats.interrupted = true;
                    break;
                }
                _ = &mut timed_out => {
                    warn!("Run timed out, stopping input");
                    stats.interrupted = true;
                    break;
                }
                _ = next_tick(&mut ticker) => {
                    report_counters(dispatcher, stats);
                }
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read input")? else {
                        info!(lines = stats.lines_read, "Input exhausted");
                        break;
                    };
                    stats.lines_read += 1;

                    let record = match parse_line(stats.lines_read, &line) {
                        Ok(Some(record)) => record,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(error = %e, "Skipping input line");
                            stats.malformed_lines += 1;
                            continue;
                        }
                    };

                    // a blocked publish must not hold off the shutdown signal
                    tokio::select! {
                        _ = dispatcher.publish_record(record) => {}
                        _ = &mut shutdown => {
                            warn!("Received shutdown signal while publishing");
                            stats.interrupted = true;
                            break;
                        }
                    }
                    stats.records_published += 1;

                    if let Some(max) = self.config.max_records {
                        if stats.records_published >= max {
                            info!(records = stats.records_published, "Reached max records limit");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Log and sample every sink's counters
fn report_counters(dispatcher: &FanoutDispatcher, stats: &mut PipelineStats) {
    for (name, counters) in dispatcher.counters() {
        stats.queue_depth.sample(&name, counters.queued);
        info!(
            sink = %name,
            queued = counters.queued,
            enqueued = counters.enqueued,
            sent = counters.sent,
            dropped = counters.dropped,
            errors = counters.errors,
            connected = counters.connected,
            "Sink counters"
        );
    }
}

/// Parse one `destination<TAB>payload` line; blank lines yield `None`
pub fn parse_line(line_no: u64, line: &str) -> error::Result<Option<Record>> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return Ok(None);
    }

    let (destination, payload) = line
        .split_once('\t')
        .ok_or_else(|| CliError::malformed_line(line_no, "missing TAB separator"))?;
    let destination = destination.trim();
    if destination.is_empty() {
        return Err(CliError::malformed_line(line_no, "empty destination"));
    }

    debug!(line = line_no, destination, "Parsed record");
    Ok(Some(Record::new(destination, payload.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ConfigVersion, DispatchConfig, SinkConfig, SinkPolicy, SinkType};
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_parse_line() {
        let record = parse_line(1, "trades\tAAPL,189.5,100\r").unwrap().unwrap();
        assert_eq!(record.destination, "trades");
        assert_eq!(record.payload, "AAPL,189.5,100".as_bytes());

        // payload may itself contain tabs
        let record = parse_line(2, "quotes\ta\tb").unwrap().unwrap();
        assert_eq!(record.payload, "a\tb".as_bytes());

        assert!(parse_line(3, "   ").unwrap().is_none());
        assert!(matches!(
            parse_line(4, "no separator"),
            Err(CliError::MalformedLine { line: 4, .. })
        ));
        assert!(parse_line(5, "\tpayload").is_err());
    }

    fn blueprint(base_path: &std::path::Path) -> FanoutBlueprint {
        let mut params = HashMap::new();
        params.insert(
            "base_path".to_string(),
            base_path.to_string_lossy().into_owned(),
        );
        FanoutBlueprint {
            version: ConfigVersion::V1,
            dispatch: DispatchConfig::default(),
            sinks: vec![
                SinkConfig {
                    name: "console".to_string(),
                    sink_type: SinkType::Log,
                    policy: SinkPolicy::default(),
                    params: HashMap::new(),
                },
                SinkConfig {
                    name: "archive".to_string(),
                    sink_type: SinkType::File,
                    policy: SinkPolicy::default(),
                    params,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_pipeline_publishes_file_input() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("feed.tsv");
        let mut input = std::fs::File::create(&input_path).unwrap();
        writeln!(input, "trades\tAAPL,189.5").unwrap();
        writeln!(input, "garbage").unwrap();
        writeln!(input).unwrap();
        writeln!(input, "quotes\tAAPL,189.4,189.6").unwrap();
        drop(input);

        let pipeline = Pipeline::new(PipelineConfig {
            blueprint: blueprint(&dir.path().join("archive")),
            input: Some(input_path),
            max_records: None,
            timeout: Some(Duration::from_secs(10)),
            report_interval: None,
            metrics_port: None,
        });

        let stats = pipeline.run(std::future::pending()).await.unwrap();
        assert_eq!(stats.lines_read, 4);
        assert_eq!(stats.records_published, 2);
        assert_eq!(stats.malformed_lines, 1);
        assert!(!stats.interrupted);
        assert_eq!(stats.sinks["archive"].sent, 2);
        assert_eq!(stats.sinks["console"].sent, 2);
    }

    #[tokio::test]
    async fn test_pipeline_honours_max_records() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("feed.tsv");
        let mut input = std::fs::File::create(&input_path).unwrap();
        for i in 0..10 {
            writeln!(input, "trades\t{i}").unwrap();
        }
        drop(input);

        let pipeline = Pipeline::new(PipelineConfig {
            blueprint: blueprint(&dir.path().join("archive")),
            input: Some(input_path),
            max_records: Some(3),
            timeout: None,
            report_interval: Some(Duration::from_millis(10)),
            metrics_port: None,
        });

        let stats = pipeline.run(std::future::pending()).await.unwrap();
        assert_eq!(stats.records_published, 3);
        assert_eq!(stats.sinks["archive"].enqueued, 3);
    }
}
