//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    // Validate config path
    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    // Load and parse configuration
    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(policy) = args.drop_policy {
        info!(policy = ?policy, "Overriding drop policy from CLI");
        blueprint.dispatch.drop_policy = policy.into();
    }
    if let Some(ms) = args.close_timeout_ms {
        info!(close_timeout_ms = ms, "Overriding close timeout from CLI");
        blueprint.dispatch.close_timeout_ms = if ms == 0 { None } else { Some(ms) };
    }

    info!(
        sinks = blueprint.sinks.len(),
        drop_policy = ?blueprint.dispatch.drop_policy,
        wait_on_close = blueprint.dispatch.wait_on_close,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    // Build pipeline configuration
    let pipeline_config = PipelineConfig {
        blueprint,
        input: args.input.clone(),
        max_records: if args.max_records == 0 {
            None
        } else {
            Some(args.max_records)
        },
        timeout: if args.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(args.timeout))
        },
        report_interval: if args.report_interval == 0 {
            None
        } else {
            Some(Duration::from_secs(args.report_interval))
        },
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
    };

    let pipeline = Pipeline::new(pipeline_config);

    info!("Starting pipeline...");
    let stats = pipeline
        .run(shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    info!(
        records = stats.records_published,
        dropped = stats.total_dropped(),
        duration_secs = stats.duration.as_secs_f64(),
        "Pipeline completed"
    );

    if args.json {
        let json = stats.to_json().context("Failed to serialize run summary")?;
        println!("{}", json);
    } else {
        stats.print_summary();
    }

    info!("Fanout finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &contracts::FanoutBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Dispatch:");
    println!("  Drop policy: {:?}", blueprint.dispatch.drop_policy);
    if let Some(ms) = blueprint.dispatch.block_timeout_ms {
        println!("  Block timeout: {} ms", ms);
    }
    println!("  Wait on close: {}", blueprint.dispatch.wait_on_close);
    match blueprint.dispatch.close_timeout_ms {
        Some(ms) => println!("  Close timeout: {} ms", ms),
        None => println!("  Close timeout: none"),
    }

    println!("\nSinks ({}):", blueprint.sinks.len());
    for sink in &blueprint.sinks {
        println!(
            "  - {} ({}) queue={} retries={}",
            sink.name,
            sink.sink_type.as_str(),
            sink.policy.queue_capacity,
            sink.policy.retry_times
        );
    }

    println!();
}
