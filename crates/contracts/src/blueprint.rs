//! FanoutBlueprint - Config Loader 输出
//!
//! 描述完整的扇出配置：分发策略、下游 sink 列表及各自的投递策略。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::SinkPolicy;

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的扇出配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 分发设置
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// 输出路由配置
    pub sinks: Vec<SinkConfig>,
}

/// 分发器设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// 背压策略
    #[serde(default)]
    pub drop_policy: DropPolicy,

    /// `block` 策略下的最长等待 (毫秒)，缺省为无限等待
    #[serde(default)]
    pub block_timeout_ms: Option<u64>,

    /// 关闭时是否等待队列排空
    #[serde(default = "default_wait_on_close")]
    pub wait_on_close: bool,

    /// 关闭等待上限 (毫秒)，缺省为无限等待
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: Option<u64>,
}

fn default_wait_on_close() -> bool {
    true
}

fn default_close_timeout_ms() -> Option<u64> {
    Some(5_000)
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            drop_policy: DropPolicy::default(),
            block_timeout_ms: None,
            wait_on_close: default_wait_on_close(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn block_timeout(&self) -> Option<Duration> {
        self.block_timeout_ms.map(Duration::from_millis)
    }

    pub fn close_timeout(&self) -> Option<Duration> {
        self.close_timeout_ms.map(Duration::from_millis)
    }
}

/// 丢包策略 (队列满时)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// 丢弃最旧的包
    #[default]
    DropOldest,
    /// 丢弃最新的包
    DropNewest,
    /// 阻塞生产者直到有空位
    Block,
}

/// Sink 输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink 名称 (唯一)
    pub name: String,

    /// Sink 类型
    pub sink_type: SinkType,

    /// 投递策略
    #[serde(flatten)]
    pub policy: SinkPolicy,

    /// 类型特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// 日志输出
    Log,
    /// 内存队列
    Memory,
    /// 文件归档
    File,
    /// 网络输出 (TCP)
    Network,
}

impl SinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Memory => "memory",
            Self::File => "file",
            Self::Network => "network",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.drop_policy, DropPolicy::DropOldest);
        assert!(config.wait_on_close);
        assert_eq!(config.close_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.block_timeout(), None);
    }

    #[test]
    fn sink_policy_is_flattened() {
        let json = r#"{
            "name": "tp",
            "sink_type": "network",
            "queue_capacity": 20000,
            "reconnect_max_ms": 5000,
            "recoverable": ["connection", "timeout"],
            "params": { "addr": "127.0.0.1:5010" }
        }"#;
        let config: SinkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.policy.queue_capacity, 20000);
        assert_eq!(config.policy.retry_times, 1);
        assert_eq!(config.policy.reconnect_initial_ms, 500);
        assert_eq!(config.policy.reconnect_max_ms, 5000);
        assert_eq!(config.policy.recoverable.len(), 2);
        assert_eq!(config.params.get("addr").map(String::as_str), Some("127.0.0.1:5010"));
    }

    #[test]
    fn drop_policy_snake_case() {
        let policy: DropPolicy = serde_json::from_str("\"drop_newest\"").unwrap();
        assert_eq!(policy, DropPolicy::DropNewest);
        let policy: DropPolicy = serde_json::from_str("\"block\"").unwrap();
        assert_eq!(policy, DropPolicy::Block);
    }
}
