//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{DropPolicy, FanoutBlueprint, SinkType};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    drop_policy: DropPolicy,
    sink_count: usize,
    total_queue_capacity: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    // Check file exists
    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    // Try to load and validate
    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    drop_policy: blueprint.dispatch.drop_policy,
                    sink_count: blueprint.sinks.len(),
                    total_queue_capacity: blueprint
                        .sinks
                        .iter()
                        .map(|s| s.policy.queue_capacity)
                        .sum(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &FanoutBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    // Check for empty sinks
    if blueprint.sinks.is_empty() {
        warnings.push("No sinks configured - published records will go nowhere".to_string());
    }

    if blueprint.dispatch.drop_policy == DropPolicy::Block
        && blueprint.dispatch.block_timeout_ms.is_none()
    {
        warnings.push(
            "drop_policy = block without block_timeout_ms - a stalled sink stalls the producer"
                .to_string(),
        );
    }

    if blueprint.dispatch.wait_on_close && blueprint.dispatch.close_timeout_ms.is_none() {
        warnings.push("close_timeout_ms unset - close may wait forever on a dead sink".to_string());
    }

    for sink in &blueprint.sinks {
        if sink.policy.recoverable.is_empty() && sink.policy.retry_times > 0 {
            warnings.push(format!(
                "Sink '{}' retries but has no recoverable error kinds",
                sink.name
            ));
        }
        if sink.sink_type == SinkType::Memory {
            warnings.push(format!(
                "Sink '{}' buffers records in memory without bound",
                sink.name
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Drop policy: {:?}", summary.drop_policy);
            println!("  Sinks: {}", summary.sink_count);
            println!("  Total queue capacity: {}", summary.total_queue_capacity);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
