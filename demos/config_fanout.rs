//! Config Fanout Example
//!
//! Loads a fanout configuration file, publishes a short burst of records
//! through the dispatcher it describes and prints the final counters.
//!
//! Run with: cargo run --bin config_fanout [config_path]

use std::path::PathBuf;

use config_loader::{ConfigFormat, ConfigLoader};
use contracts::FanoutBlueprint;
use dispatcher::create_dispatcher;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG: &str = r#"
[dispatch]
drop_policy = "drop_oldest"
close_timeout_ms = 2000

[[sinks]]
name = "console"
sink_type = "log"

[[sinks]]
name = "archive"
sink_type = "file"
params = { base_path = "./archive" }
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Config Fanout Demo");

    let blueprint = load_blueprint()?;
    info!(sinks = blueprint.sinks.len(), "Blueprint loaded");

    let dispatcher = create_dispatcher(&blueprint)?;

    for i in 0..20u32 {
        dispatcher
            .publish("trades", format!("SYM{},{}", i % 4, 100 + i))
            .await;
    }

    dispatcher.shutdown().await;

    for (name, counters) in dispatcher.counters() {
        info!(
            sink = %name,
            sent = counters.sent,
            dropped = counters.dropped,
            errors = counters.errors,
            connected = counters.connected,
            "Final counters"
        );
    }

    Ok(())
}

fn load_blueprint() -> Result<FanoutBlueprint, Box<dyn std::error::Error>> {
    match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            info!(path = %path.display(), "Loading config file");
            Ok(ConfigLoader::load_from_path(&path)?)
        }
        None => {
            info!("No config path given, using built-in config");
            Ok(ConfigLoader::load_from_str(DEFAULT_CONFIG, ConfigFormat::Toml)?)
        }
    }
}
