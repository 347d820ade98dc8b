//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{DropPolicy, FanoutBlueprint, SinkErrorKind};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    dispatch: DispatchInfo,
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct DispatchInfo {
    drop_policy: DropPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_timeout_ms: Option<u64>,
    wait_on_close: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    close_timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    params: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy: Option<PolicyInfo>,
}

#[derive(Serialize)]
struct PolicyInfo {
    queue_capacity: usize,
    retry_times: u32,
    retry_backoff_ms: u64,
    reconnect_initial_ms: u64,
    reconnect_max_ms: u64,
    recoverable: Vec<SinkErrorKind>,
    requeue_on_failure: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &FanoutBlueprint, args: &InfoArgs) -> ConfigInfo {
    let dispatch = &blueprint.dispatch;

    let sinks = blueprint
        .sinks
        .iter()
        .map(|s| SinkInfo {
            name: s.name.clone(),
            sink_type: s.sink_type.as_str().to_string(),
            params: s.params.clone(),
            policy: args.policies.then(|| PolicyInfo {
                queue_capacity: s.policy.queue_capacity,
                retry_times: s.policy.retry_times,
                retry_backoff_ms: s.policy.retry_backoff_ms,
                reconnect_initial_ms: s.policy.reconnect_initial_ms,
                reconnect_max_ms: s.policy.reconnect_max_ms,
                recoverable: s.policy.recoverable.clone(),
                requeue_on_failure: s.policy.requeue_on_failure,
            }),
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        dispatch: DispatchInfo {
            drop_policy: dispatch.drop_policy,
            block_timeout_ms: dispatch.block_timeout_ms,
            wait_on_close: dispatch.wait_on_close,
            close_timeout_ms: dispatch.close_timeout_ms,
        },
        sinks,
    }
}

fn print_config_info(blueprint: &FanoutBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                   Fanout Configuration                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let dispatch = &blueprint.dispatch;
    println!("⚙️  Dispatch");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Drop policy: {:?}", dispatch.drop_policy);
    match dispatch.block_timeout_ms {
        Some(ms) => println!("   ├─ Block timeout: {} ms", ms),
        None => println!("   ├─ Block timeout: (wait forever)"),
    }
    println!("   ├─ Wait on close: {}", dispatch.wait_on_close);
    match dispatch.close_timeout_ms {
        Some(ms) => println!("   └─ Close timeout: {} ms", ms),
        None => println!("   └─ Close timeout: (wait forever)"),
    }

    println!("\n📤 Sinks ({})", blueprint.sinks.len());
    for (i, sink) in blueprint.sinks.iter().enumerate() {
        let is_last = i == blueprint.sinks.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!("   {} {} ({})", prefix, sink.name, sink.sink_type.as_str());

        let mut params: Vec<_> = sink.params.iter().collect();
        params.sort();
        for (key, value) in params {
            println!("   {}  ├─ {} = {}", child_prefix, key, value);
        }

        if args.policies {
            let p = &sink.policy;
            println!(
                "   {}  ├─ Queue: {} (requeue on failure: {})",
                child_prefix, p.queue_capacity, p.requeue_on_failure
            );
            println!(
                "   {}  ├─ Retries: {} every {} ms",
                child_prefix, p.retry_times, p.retry_backoff_ms
            );
            println!(
                "   {}  ├─ Reconnect backoff: {}..{} ms",
                child_prefix, p.reconnect_initial_ms, p.reconnect_max_ms
            );
            let kinds: Vec<_> = p.recoverable.iter().map(|k| k.to_string()).collect();
            println!("   {}  └─ Recoverable: [{}]", child_prefix, kinds.join(", "));
        } else {
            println!(
                "   {}  └─ Queue: {}, retries: {}",
                child_prefix, sink.policy.queue_capacity, sink.policy.retry_times
            );
        }
    }

    println!();
}
