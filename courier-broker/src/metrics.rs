//! 指标上报（MetricsSink）
//!
//! 定义 Broker 对外的窄上报接口。实现方可对接任意指标系统；
//! 接口全部为不可失败签名，上报异常不允许影响 Broker 的正确性。
//!
use std::time::Duration;

/// 指标槽：尽力而为的观测上报
pub trait MetricsSink: Send + Sync {
    /// 某主题发布了一条消息
    fn incr_published(&self, topic: &str);

    /// 某主题的一次处理耗时观测（仅成功投递时上报）
    fn observe_processing(&self, topic: &str, elapsed: Duration);

    /// 某主题的一条消息进入死信列表
    fn incr_dead_lettered(&self, topic: &str);
}

/// 默认实现：丢弃全部观测，仅保留 trace 级日志
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_published(&self, _topic: &str) {}

    fn observe_processing(&self, topic: &str, elapsed: Duration) {
        tracing::trace!(topic, ?elapsed, "message processed");
    }

    fn incr_dead_lettered(&self, _topic: &str) {}
}
