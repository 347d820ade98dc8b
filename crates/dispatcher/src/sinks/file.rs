//! FileSink - appends payloads to per-destination archive files

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{NaiveDate, Utc};
use contracts::{Capabilities, FanoutSink, Record, SinkError};
use tracing::{debug, error, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Base output directory
    pub base_path: PathBuf,
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./archive"));

        Self { base_path }
    }
}

#[derive(Default)]
struct ArchiveFiles {
    /// Day the open writers belong to
    day: Option<NaiveDate>,
    writers: HashMap<String, BufWriter<File>>,
}

/// Sink that archives each record as one line of `<base>/<day>/<destination>.log`
///
/// Writers stay open between records and are flushed on close.
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    files: Mutex<ArchiveFiles>,
}

impl FileSink {
    /// Create a new FileSink
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        // Create base directory if it doesn't exist
        fs::create_dir_all(&config.base_path)?;

        Ok(Self {
            name: name.into(),
            config,
            files: Mutex::new(ArchiveFiles::default()),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        let config = FileSinkConfig::from_params(params);
        Self::new(name, config)
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    /// Archive file of a destination on a given day
    pub fn archive_path(&self, day: NaiveDate, destination: &str) -> PathBuf {
        self.config
            .base_path
            .join(day.format("%Y-%m-%d").to_string())
            .join(format!("{}.log", sanitize(destination)))
    }

    fn append(&self, record: &Record) -> std::io::Result<()> {
        let today = Utc::now().date_naive();
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);

        if files.day != Some(today) {
            // day rolled over: writers of the previous day flush on drop
            files.writers.clear();
            files.day = Some(today);
        }

        if !files.writers.contains_key(&record.destination) {
            let path = self.archive_path(today, &record.destination);
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(sink = %self.name, path = %path.display(), "Archive file opened");
            files
                .writers
                .insert(record.destination.clone(), BufWriter::new(file));
        }

        let Some(writer) = files.writers.get_mut(&record.destination) else {
            return Ok(());
        };
        writer.write_all(&record.payload)?;
        if !record.payload.ends_with(b"\n") {
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn flush_all(&self) -> std::io::Result<()> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        for writer in files.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Keep destination names from escaping the day directory
fn sanitize(destination: &str) -> String {
    let cleaned: String = destination
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        _ => cleaned,
    }
}

impl FanoutSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::publish_only().with_close()
    }

    #[instrument(
        name = "file_sink_publish",
        skip(self, record),
        fields(sink = %self.name, destination = %record.destination)
    )]
    async fn publish(&self, record: &Record) -> Result<(), SinkError> {
        self.append(record).map_err(|e| {
            error!(sink = %self.name, error = %e, "Archive write failed");
            SinkError::from(e)
        })
    }

    async fn connect(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn is_ready(&self) -> Result<bool, SinkError> {
        Ok(true)
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&self) -> Result<(), SinkError> {
        self.flush_all()?;
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .writers
            .clear();
        debug!(sink = %self.name, "FileSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let config = FileSinkConfig {
            base_path: dir.path().to_path_buf(),
        };

        let sink = FileSink::new("test_file", config).unwrap();
        sink.publish(&Record::new("trades", "AAPL,189.5")).await.unwrap();
        sink.publish(&Record::new("trades", "MSFT,411.2\n")).await.unwrap();
        sink.publish(&Record::new("quotes", "AAPL,189.4,189.6")).await.unwrap();
        sink.close().await.unwrap();

        let today = Utc::now().date_naive();
        let trades = fs::read_to_string(sink.archive_path(today, "trades")).unwrap();
        assert_eq!(trades, "AAPL,189.5\nMSFT,411.2\n");
        let quotes = fs::read_to_string(sink.archive_path(today, "quotes")).unwrap();
        assert_eq!(quotes, "AAPL,189.4,189.6\n");
    }

    #[test]
    fn test_destination_is_sanitized() {
        assert_eq!(sanitize("trades"), "trades");
        assert_eq!(sanitize("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize(".."), "_");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn test_config_default_base_path() {
        let config = FileSinkConfig::from_params(&HashMap::new());
        assert_eq!(config.base_path, PathBuf::from("./archive"));
    }
}
