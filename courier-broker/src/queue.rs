//! 队列存储（QueueStore）
//!
//! 命名队列仅承担可观测职责：与主题同名的队列会缓存发布到该主题的
//! 消息副本，并由周期任务重算派生统计。投递的权威路径始终是 Router，
//! 队列不参与分发。
//!
use crate::error::{BrokerError, BrokerResult};
use crate::message::Message;
use crate::routing::TopicRouter;
use bon::Builder;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 队列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    Direct,
    Topic,
    Fanout,
    Headers,
    Priority,
    Delay,
}

/// 队列选项
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize)]
pub struct QueueOptions {
    /// 缓冲上限，超出时丢弃最旧的消息副本
    max_length: Option<usize>,
    /// 消息存活时长提示
    message_ttl: Option<Duration>,
    /// 死信转发目标提示
    dead_letter_exchange: Option<String>,
    /// 优先级提示
    priority: Option<u8>,
    /// 延迟队列提示
    #[builder(default)]
    delayed: bool,
}

impl QueueOptions {
    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    pub fn message_ttl(&self) -> Option<Duration> {
        self.message_ttl
    }

    pub fn dead_letter_exchange(&self) -> Option<&str> {
        self.dead_letter_exchange.as_deref()
    }

    pub fn priority(&self) -> Option<u8> {
        self.priority
    }

    pub fn delayed(&self) -> bool {
        self.delayed
    }
}

/// 队列描述符
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct QueueDescriptor {
    name: String,
    #[builder(default = QueueType::Direct)]
    queue_type: QueueType,
    #[builder(default)]
    durable: bool,
    #[builder(default)]
    auto_delete: bool,
    #[builder(default)]
    options: QueueOptions,
}

impl QueueDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }
}

/// 派生统计：周期重算的近似值
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStatistics {
    message_count: usize,
    consumer_count: usize,
    publish_rate: f64,
    consume_rate: f64,
}

impl QueueStatistics {
    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn consumer_count(&self) -> usize {
        self.consumer_count
    }

    pub fn publish_rate(&self) -> f64 {
        self.publish_rate
    }

    pub fn consume_rate(&self) -> f64 {
        self.consume_rate
    }
}

struct QueueEntry {
    descriptor: QueueDescriptor,
    buffer: Mutex<VecDeque<Message>>,
    statistics: Mutex<QueueStatistics>,
}

/// 队列存储：命名队列与派生统计
#[derive(Default)]
pub struct QueueStore {
    queues: DashMap<String, Arc<QueueEntry>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个命名队列，统计从零开始
    pub fn create(&self, descriptor: QueueDescriptor) -> BrokerResult<()> {
        let name = descriptor.name().to_string();
        if self.queues.contains_key(&name) {
            return Err(BrokerError::invalid_state(format!(
                "queue already exists: {name}"
            )));
        }

        let entry = Arc::new(QueueEntry {
            descriptor,
            buffer: Mutex::new(VecDeque::new()),
            statistics: Mutex::new(QueueStatistics::default()),
        });
        self.queues.insert(name.clone(), entry);

        tracing::debug!(queue = %name, "queue created");
        Ok(())
    }

    /// 查询队列描述符与当前统计
    pub fn get(&self, name: &str) -> BrokerResult<(QueueDescriptor, QueueStatistics)> {
        let entry = self
            .queues
            .get(name)
            .ok_or_else(|| BrokerError::not_found(format!("queue: {name}")))?;

        let statistics = entry
            .statistics
            .lock()
            .map(|s| *s)
            .unwrap_or_default();

        Ok((entry.descriptor.clone(), statistics))
    }

    /// 与主题同名的队列缓存一份消息副本
    pub(crate) fn buffer(&self, topic: &str, message: &Message) {
        let Some(entry) = self.queues.get(topic).map(|e| e.value().clone()) else {
            return;
        };

        if let Ok(mut buffer) = entry.buffer.lock() {
            buffer.push_back(message.clone());
            if let Some(max) = entry.descriptor.options().max_length() {
                while buffer.len() > max {
                    buffer.pop_front();
                }
            }
        }
    }

    /// 周期重算派生统计
    ///
    /// publish_rate 取两次重算之间新增的缓冲条数除以间隔；
    /// consumer_count 取 Router 中该名字的精确订阅数。
    pub(crate) fn sweep(&self, router: &TopicRouter, interval: Duration) {
        let secs = interval.as_secs_f64().max(f64::EPSILON);

        for entry in self.queues.iter() {
            let buffered = entry
                .buffer
                .lock()
                .map(|b| b.len())
                .unwrap_or(0);

            if let Ok(mut stats) = entry.statistics.lock() {
                let delta = buffered.saturating_sub(stats.message_count);
                stats.publish_rate = delta as f64 / secs;
                stats.consume_rate = 0.0;
                stats.message_count = buffered;
                stats.consumer_count = router.consumers_of(entry.key());
            }
        }
    }

    /// 队列总数
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// 全部队列缓冲的消息总数
    pub fn buffered_total(&self) -> usize {
        self.queues
            .iter()
            .map(|e| e.buffer.lock().map(|b| b.len()).unwrap_or(0))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PublishOptions;

    fn descriptor(name: &str) -> QueueDescriptor {
        QueueDescriptor::builder().name(name.to_string()).build()
    }

    fn message(topic: &str) -> Message {
        Message::compose(topic, serde_json::Value::Null, PublishOptions::default())
    }

    #[test]
    fn create_then_get_starts_at_zero() {
        let store = QueueStore::new();
        store.create(descriptor("todo.created")).unwrap();

        let (desc, stats) = store.get("todo.created").unwrap();
        assert_eq!(desc.name(), "todo.created");
        assert_eq!(desc.queue_type(), QueueType::Direct);
        assert_eq!(stats.message_count(), 0);
        assert_eq!(stats.publish_rate(), 0.0);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let store = QueueStore::new();
        store.create(descriptor("q")).unwrap();
        assert!(store.create(descriptor("q")).is_err());
    }

    #[test]
    fn unknown_queue_is_not_found() {
        let store = QueueStore::new();
        assert!(matches!(
            store.get("missing"),
            Err(BrokerError::NotFound { .. })
        ));
    }

    #[test]
    fn buffer_honors_max_length() {
        let store = QueueStore::new();
        let desc = QueueDescriptor::builder()
            .name("q".to_string())
            .options(QueueOptions::builder().max_length(2).build())
            .build();
        store.create(desc).unwrap();

        for _ in 0..5 {
            store.buffer("q", &message("q"));
        }
        assert_eq!(store.buffered_total(), 2);
    }

    #[test]
    fn sweep_recomputes_rates_and_consumers() {
        let store = QueueStore::new();
        let router = TopicRouter::new();
        store.create(descriptor("q")).unwrap();

        for _ in 0..10 {
            store.buffer("q", &message("q"));
        }
        store.sweep(&router, Duration::from_secs(5));

        let (_, stats) = store.get("q").unwrap();
        assert_eq!(stats.message_count(), 10);
        assert_eq!(stats.publish_rate(), 2.0);
        assert_eq!(stats.consumer_count(), 0);
    }
}
