//! Run statistics and summary output.

use std::collections::BTreeMap;
use std::time::Duration;

use dispatcher::SinkCounters;
use observability::QueueDepthAggregator;
use serde::Serialize;

/// Statistics from a `run` invocation
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Input lines read (blank lines included)
    pub lines_read: u64,

    /// Records handed to the dispatcher
    pub records_published: u64,

    /// Lines that were not `destination<TAB>payload`
    pub malformed_lines: u64,

    /// Stopped by a signal or the run timeout
    pub interrupted: bool,

    /// Total duration of the run
    pub duration: Duration,

    /// Final per-sink counters, taken after close
    pub sinks: BTreeMap<String, SinkCounters>,

    /// Queue depth samples from the periodic reports
    pub queue_depth: QueueDepthAggregator,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    lines_read: u64,
    records_published: u64,
    malformed_lines: u64,
    interrupted: bool,
    duration_secs: f64,
    records_per_sec: f64,
    sinks: &'a BTreeMap<String, SinkCounters>,
}

impl PipelineStats {
    /// Records per second throughput
    pub fn rps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.records_published as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Dropped records over every sink
    pub fn total_dropped(&self) -> u64 {
        self.sinks.values().map(|c| c.dropped).sum()
    }

    /// Summary as a JSON document
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&JsonSummary {
            lines_read: self.lines_read,
            records_published: self.records_published,
            malformed_lines: self.malformed_lines,
            interrupted: self.interrupted,
            duration_secs: self.duration.as_secs_f64(),
            records_per_sec: self.rps(),
            sinks: &self.sinks,
        })
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                      Fanout Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Lines read: {}", self.lines_read);
        println!("   ├─ Records published: {}", self.records_published);
        println!("   ├─ Malformed lines: {}", self.malformed_lines);
        println!("   ├─ Records/s: {:.2}", self.rps());
        println!("   └─ Interrupted: {}", self.interrupted);

        println!("\n📤 Sinks ({})", self.sinks.len());
        let last = self.sinks.len().saturating_sub(1);
        for (i, (name, c)) in self.sinks.iter().enumerate() {
            let (prefix, child) = if i == last {
                ("└─", "   ")
            } else {
                ("├─", "│  ")
            };
            println!(
                "   {} {} ({})",
                prefix,
                name,
                if c.connected { "connected" } else { "disconnected" }
            );
            println!(
                "   {}  ├─ enqueued={} sent={} dropped={} errors={} reconnects={} queued={}",
                child, c.enqueued, c.sent, c.dropped, c.errors, c.reconnects, c.queued
            );
            if let Some(summary) = self.queue_depth.summary(name) {
                println!("   {}  ├─ Queue depth: {}", child, summary);
            }
            match &c.last_error {
                Some(err) => println!("   {}  └─ Last error: {}", child, err),
                None => println!("   {}  └─ Last error: -", child),
            }
        }

        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(sent: u64, dropped: u64) -> SinkCounters {
        SinkCounters {
            queued: 0,
            enqueued: sent + dropped,
            sent,
            dropped,
            errors: 0,
            reconnects: 0,
            connected: true,
            last_error: None,
            backoff: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_rps_and_drops() {
        let mut stats = PipelineStats {
            records_published: 100,
            duration: Duration::from_secs(4),
            ..Default::default()
        };
        stats.sinks.insert("tp".to_string(), counters(90, 10));
        stats.sinks.insert("archive".to_string(), counters(100, 0));

        assert!((stats.rps() - 25.0).abs() < 1e-9);
        assert_eq!(stats.total_dropped(), 10);
        assert_eq!(PipelineStats::default().rps(), 0.0);
    }

    #[test]
    fn test_json_summary_carries_sink_counters() {
        let mut stats = PipelineStats {
            lines_read: 3,
            records_published: 2,
            malformed_lines: 1,
            ..Default::default()
        };
        stats.sinks.insert("tp".to_string(), counters(2, 0));

        let value: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(value["records_published"], 2);
        assert_eq!(value["sinks"]["tp"]["sent"], 2);
        assert_eq!(value["sinks"]["tp"]["backoff_secs"], 0.5);
    }
}
