//! Fanout 指标收集模块
//!
//! 通过 `metrics` facade 记录每个 sink 的投递、丢弃、错误与重连情况，
//! 并提供队列深度的在线统计。

use std::collections::HashMap;

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// 丢弃原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// drop_oldest 策略淘汰的旧记录
    Evicted,
    /// 队列已满 (drop_newest / block 超时)
    QueueFull,
    /// 失败回插时队列已满
    RequeueFull,
    /// 停机过程中无法投递
    Shutdown,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evicted => "evicted",
            Self::QueueFull => "queue_full",
            Self::RequeueFull => "requeue_full",
            Self::Shutdown => "shutdown",
        }
    }
}

/// 注册指标说明 (Prometheus HELP 文本)
pub fn describe_fanout_metrics() {
    describe_counter!(
        "fanout_records_enqueued_total",
        "Records accepted into a sink queue"
    );
    describe_counter!(
        "fanout_records_dropped_total",
        "Records a sink never delivered, by reason"
    );
    describe_counter!(
        "fanout_records_sent_total",
        "Records a sink published successfully"
    );
    describe_counter!(
        "fanout_publish_errors_total",
        "Failed publish attempts, by failure class"
    );
    describe_counter!(
        "fanout_reconnects_total",
        "Successful (re)connections of a sink"
    );
    describe_gauge!("fanout_sink_connected", "1 when the sink is connected");
    describe_gauge!("fanout_queue_depth", "Records waiting in a sink queue");
}

/// 记录入队
pub fn record_enqueued(sink_name: &str) {
    counter!("fanout_records_enqueued_total", "sink" => sink_name.to_string()).increment(1);
}

/// 记录丢弃
pub fn record_dropped(sink_name: &str, reason: DropReason, count: u64) {
    counter!(
        "fanout_records_dropped_total",
        "sink" => sink_name.to_string(),
        "reason" => reason.as_str()
    )
    .increment(count);
}

/// 记录投递成功
pub fn record_sent(sink_name: &str) {
    counter!("fanout_records_sent_total", "sink" => sink_name.to_string()).increment(1);
}

/// 记录投递失败
pub fn record_publish_error(sink_name: &str, class: &'static str) {
    counter!(
        "fanout_publish_errors_total",
        "sink" => sink_name.to_string(),
        "class" => class
    )
    .increment(1);
}

/// 记录连接状态
pub fn record_connection(sink_name: &str, connected: bool) {
    gauge!("fanout_sink_connected", "sink" => sink_name.to_string())
        .set(if connected { 1.0 } else { 0.0 });
}

/// 记录一次成功的 (重新) 连接
pub fn record_reconnect(sink_name: &str) {
    counter!("fanout_reconnects_total", "sink" => sink_name.to_string()).increment(1);
}

/// 记录队列深度
pub fn record_queue_depth(sink_name: &str, depth: usize) {
    gauge!("fanout_queue_depth", "sink" => sink_name.to_string()).set(depth as f64);
}

/// 队列深度聚合器
///
/// 周期性采样各 sink 的队列深度，便于运行结束时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct QueueDepthAggregator {
    per_sink: HashMap<String, RunningStats>,
}

impl QueueDepthAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次采样
    pub fn sample(&mut self, sink_name: &str, depth: usize) {
        self.per_sink
            .entry(sink_name.to_string())
            .or_default()
            .push(depth as f64);
    }

    /// 某个 sink 的统计摘要
    pub fn summary(&self, sink_name: &str) -> Option<StatsSummary> {
        self.per_sink.get(sink_name).map(StatsSummary::from)
    }

    /// 已采样的 sink 名称 (排序)
    pub fn sinks(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.per_sink.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.0}, max={:.0}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}
