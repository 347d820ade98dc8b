//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::DropPolicy;
use std::path::PathBuf;

/// Fanout - deliver one record stream to many independent sinks
#[derive(Parser, Debug)]
#[command(
    name = "fanout",
    author,
    version,
    about = "Fan a record stream out to multiple sinks",
    long_about = "Reads `destination<TAB>payload` lines and publishes every record to each\n\
                  configured sink through its own bounded queue, connection supervisor\n\
                  and retry policy. A slow or unreachable sink never stalls the others."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "FANOUT_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "FANOUT_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish records from a file or stdin
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "fanout.toml", env = "FANOUT_CONFIG")]
    pub config: PathBuf,

    /// Input file with `destination<TAB>payload` lines (stdin if omitted)
    #[arg(short, long, env = "FANOUT_INPUT")]
    pub input: Option<PathBuf>,

    /// Override the configured overload policy
    #[arg(long, value_enum, env = "FANOUT_DROP_POLICY")]
    pub drop_policy: Option<DropPolicyArg>,

    /// Override the configured close timeout in milliseconds (0 = wait forever)
    #[arg(long, env = "FANOUT_CLOSE_TIMEOUT_MS")]
    pub close_timeout_ms: Option<u64>,

    /// Maximum number of records to publish (0 = unlimited)
    #[arg(long, default_value = "0", env = "FANOUT_MAX_RECORDS")]
    pub max_records: u64,

    /// Run timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "FANOUT_TIMEOUT")]
    pub timeout: u64,

    /// Seconds between counter reports (0 = disabled)
    #[arg(long, default_value = "5", env = "FANOUT_REPORT_INTERVAL")]
    pub report_interval: u64,

    /// Validate configuration and exit without publishing
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "FANOUT_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "fanout.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "fanout.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show each sink's delivery policy
    #[arg(long)]
    pub policies: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Overload policy accepted on the command line
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum DropPolicyArg {
    /// Evict the oldest queued record
    DropOldest,
    /// Drop the incoming record
    DropNewest,
    /// Wait for queue space
    Block,
}

impl From<DropPolicyArg> for DropPolicy {
    fn from(arg: DropPolicyArg) -> Self {
        match arg {
            DropPolicyArg::DropOldest => DropPolicy::DropOldest,
            DropPolicyArg::DropNewest => DropPolicy::DropNewest,
            DropPolicyArg::Block => DropPolicy::Block,
        }
    }
}
