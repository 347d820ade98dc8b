//! 配置校验模块
//!
//! 校验规则：
//! - sink 名称非空且唯一
//! - queue_capacity > 0
//! - 0 < reconnect_initial_ms <= reconnect_max_ms
//! - block_timeout_ms (若设置) > 0
//! - 类型特定参数齐全 (network 需要合法的 addr)

use std::collections::HashSet;
use std::net::SocketAddr;

use contracts::{ContractError, FanoutBlueprint, SinkConfig, SinkType};

/// 校验 FanoutBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &FanoutBlueprint) -> Result<(), ContractError> {
    validate_sink_names(blueprint)?;
    validate_dispatch(blueprint)?;
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        validate_sink_policy(idx, sink)?;
        validate_sink_params(idx, sink)?;
    }
    Ok(())
}

/// 校验 sink 名称非空且唯一
fn validate_sink_names(blueprint: &FanoutBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{}].name", idx),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
    }
    Ok(())
}

/// 校验分发设置
fn validate_dispatch(blueprint: &FanoutBlueprint) -> Result<(), ContractError> {
    if blueprint.dispatch.block_timeout_ms == Some(0) {
        return Err(ContractError::config_validation(
            "dispatch.block_timeout_ms",
            "block_timeout_ms must be > 0 (omit it to wait forever)",
        ));
    }
    Ok(())
}

/// 校验投递策略
fn validate_sink_policy(idx: usize, sink: &SinkConfig) -> Result<(), ContractError> {
    let policy = &sink.policy;

    if policy.queue_capacity == 0 {
        return Err(ContractError::config_validation(
            format!("sinks[{}].queue_capacity", idx),
            "queue_capacity must be > 0",
        ));
    }

    if policy.reconnect_initial_ms == 0 {
        return Err(ContractError::config_validation(
            format!("sinks[{}].reconnect_initial_ms", idx),
            "reconnect_initial_ms must be > 0",
        ));
    }

    if policy.reconnect_initial_ms > policy.reconnect_max_ms {
        return Err(ContractError::config_validation(
            format!(
                "sinks[{}].reconnect_initial_ms / sinks[{}].reconnect_max_ms",
                idx, idx
            ),
            format!(
                "reconnect_initial_ms ({}) must be <= reconnect_max_ms ({})",
                policy.reconnect_initial_ms, policy.reconnect_max_ms
            ),
        ));
    }

    Ok(())
}

/// 校验类型特定参数
fn validate_sink_params(idx: usize, sink: &SinkConfig) -> Result<(), ContractError> {
    if sink.sink_type != SinkType::Network {
        return Ok(());
    }

    let field = format!("sinks[{}].params.addr", idx);
    let addr = sink
        .params
        .get("addr")
        .ok_or_else(|| ContractError::config_validation(&field, "network sink requires 'addr'"))?;

    addr.parse::<SocketAddr>().map_err(|e| {
        ContractError::config_validation(&field, format!("invalid address '{}': {}", addr, e))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ConfigVersion, DispatchConfig, SinkPolicy};
    use std::collections::HashMap;

    fn sink(name: &str, sink_type: SinkType) -> SinkConfig {
        SinkConfig {
            name: name.into(),
            sink_type,
            policy: SinkPolicy::default(),
            params: HashMap::new(),
        }
    }

    fn minimal_blueprint() -> FanoutBlueprint {
        let mut network = sink("tp", SinkType::Network);
        network
            .params
            .insert("addr".into(), "127.0.0.1:5010".into());

        FanoutBlueprint {
            version: ConfigVersion::V1,
            dispatch: DispatchConfig::default(),
            sinks: vec![sink("log", SinkType::Log), network],
        }
    }

    #[test]
    fn test_valid_config() {
        let bp = minimal_blueprint();
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_duplicate_sink_name() {
        let mut bp = minimal_blueprint();
        bp.sinks.push(sink("log", SinkType::Memory));
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("duplicate sink name"), "got: {err}");
    }

    #[test]
    fn test_empty_sink_name() {
        let mut bp = minimal_blueprint();
        bp.sinks[0].name = String::new();
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("cannot be empty"), "got: {err}");
    }

    #[test]
    fn test_zero_capacity() {
        let mut bp = minimal_blueprint();
        bp.sinks[0].policy.queue_capacity = 0;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("queue_capacity must be > 0"), "got: {err}");
    }

    #[test]
    fn test_inverted_reconnect_bounds() {
        let mut bp = minimal_blueprint();
        bp.sinks[1].policy.reconnect_initial_ms = 2_000;
        bp.sinks[1].policy.reconnect_max_ms = 500;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("must be <= reconnect_max_ms"), "got: {err}");
    }

    #[test]
    fn test_zero_block_timeout() {
        let mut bp = minimal_blueprint();
        bp.dispatch.block_timeout_ms = Some(0);
        assert!(validate(&bp).is_err());
    }

    #[test]
    fn test_network_requires_addr() {
        let mut bp = minimal_blueprint();
        bp.sinks[1].params.clear();
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("requires 'addr'"), "got: {err}");

        bp.sinks[1]
            .params
            .insert("addr".into(), "not-an-address".into());
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("invalid address"), "got: {err}");
    }
}
