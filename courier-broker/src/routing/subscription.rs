//! 订阅协议（MessageHandler / Subscription）
//!
//! 定义消费消息的处理器回调协议与订阅参数。订阅在 Router 的 arena
//! 中以处理器 ID 为键存放，取消订阅即从 arena 移除，无需回调身份比较。
//!
use crate::message::Message;
use crate::routing::pattern::TopicPattern;
use async_trait::async_trait;
use bon::Builder;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 处理器 ID：订阅 arena 的键
pub type HandlerId = Uuid;

/// 消息处理器：处理投递到订阅主题的消息
///
/// 投递语义为至少一次，处理器需要自行保证幂等。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

/// 订阅参数
#[derive(Debug, Clone, Builder)]
pub struct SubscribeOptions {
    /// 是否自动确认（预留给外部传输适配）
    #[builder(default = true)]
    auto_ack: bool,
    /// 预取数量（预留给外部传输适配）
    #[builder(default = 1)]
    prefetch: usize,
    /// 重试退避的基准延迟，第 k 次重试等待 `2^k x retry_delay`
    #[builder(default = Duration::from_millis(100))]
    retry_delay: Duration,
    /// 死信转发目标（预留；死信列表始终记录）
    dead_letter_queue: Option<String>,
    /// 单处理器的并发提示
    #[builder(default = 1)]
    concurrency: usize,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        SubscribeOptions::builder().build()
    }
}

impl SubscribeOptions {
    pub fn auto_ack(&self) -> bool {
        self.auto_ack
    }

    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn dead_letter_queue(&self) -> Option<&str> {
        self.dead_letter_queue.as_deref()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// 一条登记在 Router 中的订阅
pub struct Subscription {
    id: HandlerId,
    topic: String,
    pattern: Option<TopicPattern>,
    handler: Arc<dyn MessageHandler>,
    options: SubscribeOptions,
}

impl Subscription {
    pub(crate) fn new(
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
    ) -> Self {
        let pattern = TopicPattern::is_pattern(topic).then(|| TopicPattern::compile(topic));

        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            pattern,
            handler,
            options,
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn pattern(&self) -> Option<&TopicPattern> {
        self.pattern.as_ref()
    }

    pub fn handler(&self) -> &Arc<dyn MessageHandler> {
        &self.handler
    }

    pub fn options(&self) -> &SubscribeOptions {
        &self.options
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}
