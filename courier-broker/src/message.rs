//! 消息模型（Message）
//!
//! 定义在 Broker 内流转的标准消息形态：负载、路由信息与投递元数据。
//! 消息一经创建即视为不可变，唯一例外是 `metadata.retry_count`，
//! 由重试控制器在每次失败后递增。
//!
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// 投递元数据：来源、追踪信息与重试预算
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// 消息来源（调用方标识）
    source: String,
    /// 消息创建时间
    timestamp: DateTime<Utc>,
    /// 关联 ID，用于将多条消息关联到同一个业务操作
    correlation_id: Option<String>,
    /// 链路追踪 ID
    trace_id: Option<String>,
    /// 优先级，仅作为路由提示
    #[builder(default)]
    priority: u8,
    /// 已重试次数，由重试控制器维护
    #[builder(default)]
    retry_count: u32,
    /// 重试预算，超出后进入死信列表
    #[builder(default = 3)]
    max_retries: u32,
    /// 存活时长，超时的消息在投递前被丢弃
    ttl: Option<Duration>,
}

impl MessageMetadata {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

/// 路由信息：面向外部交换机的提示字段，Broker 本身不解释
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize)]
pub struct MessageRouting {
    exchange: Option<String>,
    routing_key: Option<String>,
    headers: Option<HashMap<String, String>>,
}

impl MessageRouting {
    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    pub fn headers(&self) -> Option<&HashMap<String, String>> {
        self.headers.as_ref()
    }
}

/// Broker 内流转的消息
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct Message {
    /// 消息唯一标识符
    id: Uuid,
    /// 消息类型，用于区分不同的消息语义
    message_type: String,
    /// 发布主题
    topic: String,
    /// 消息负载
    payload: Value,
    /// 投递元数据
    metadata: MessageMetadata,
    /// 路由提示
    #[builder(default)]
    routing: MessageRouting,
}

impl Message {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    pub fn routing(&self) -> &MessageRouting {
        &self.routing
    }

    /// 根据发布参数组装一条新消息
    pub(crate) fn compose(topic: &str, payload: Value, options: PublishOptions) -> Self {
        let metadata = MessageMetadata::builder()
            .source(options.source.unwrap_or_else(|| "in-process".to_string()))
            .timestamp(Utc::now())
            .maybe_correlation_id(options.correlation_id)
            .maybe_trace_id(options.trace_id)
            .priority(options.priority.unwrap_or_default())
            .max_retries(options.max_retries.unwrap_or(3))
            .maybe_ttl(options.ttl)
            .build();

        let routing = MessageRouting::builder()
            .maybe_exchange(options.exchange)
            .maybe_routing_key(options.routing_key)
            .maybe_headers(options.headers)
            .build();

        Message::builder()
            .id(Uuid::new_v4())
            .message_type(options.message_type.unwrap_or_else(|| "message".to_string()))
            .topic(topic.to_string())
            .payload(payload)
            .metadata(metadata)
            .routing(routing)
            .build()
    }

    /// 记录一次失败重试
    pub(crate) fn record_retry(&mut self) {
        self.metadata.retry_count += 1;
    }

    /// 重试预算是否已耗尽
    pub(crate) fn retries_exhausted(&self) -> bool {
        self.metadata.retry_count > self.metadata.max_retries
    }

    /// 消息是否已超出存活时长
    pub(crate) fn expired(&self, now: DateTime<Utc>) -> bool {
        match self.metadata.ttl.and_then(|d| chrono::Duration::from_std(d).ok()) {
            Some(ttl) => now - self.metadata.timestamp > ttl,
            None => false,
        }
    }
}

/// 发布参数：全部可选，未指定时采用默认投递策略
#[derive(Debug, Clone, Default, Builder)]
pub struct PublishOptions {
    /// 消息来源（默认 "in-process"）
    source: Option<String>,
    /// 消息类型（默认 "message"）
    message_type: Option<String>,
    correlation_id: Option<String>,
    trace_id: Option<String>,
    priority: Option<u8>,
    /// 重试预算（默认 3）
    max_retries: Option<u32>,
    ttl: Option<Duration>,
    exchange: Option<String>,
    routing_key: Option<String>,
    headers: Option<HashMap<String, String>>,
}

/// 死信条目：重试耗尽后的消息及其失败现场
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    message: Message,
    /// 原始发布主题
    original_topic: String,
    /// 最终失败的处理器 ID
    handler_id: Uuid,
    /// 最后一次失败原因
    error: String,
    /// 进入死信列表的时间
    failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn original_topic(&self) -> &str {
        &self.original_topic
    }

    pub fn handler_id(&self) -> Uuid {
        self.handler_id
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn failed_at(&self) -> DateTime<Utc> {
        self.failed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_applies_defaults() {
        let msg = Message::compose(
            "todo.created",
            serde_json::json!({"id": "t1"}),
            PublishOptions::default(),
        );

        assert_eq!(msg.topic(), "todo.created");
        assert_eq!(msg.message_type(), "message");
        assert_eq!(msg.metadata().retry_count(), 0);
        assert_eq!(msg.metadata().max_retries(), 3);
        assert!(!msg.retries_exhausted());
    }

    #[test]
    fn retry_budget_is_exhausted_after_max_retries() {
        let mut msg = Message::compose(
            "todo.created",
            Value::Null,
            PublishOptions::builder().max_retries(2).build(),
        );

        msg.record_retry();
        msg.record_retry();
        assert!(!msg.retries_exhausted());
        msg.record_retry();
        assert!(msg.retries_exhausted());
        assert_eq!(msg.metadata().retry_count(), 3);
    }

    #[test]
    fn ttl_expiry_is_measured_from_creation() {
        let msg = Message::compose(
            "todo.created",
            Value::Null,
            PublishOptions::builder().ttl(Duration::from_secs(60)).build(),
        );

        assert!(!msg.expired(Utc::now()));
        assert!(msg.expired(Utc::now() + chrono::Duration::seconds(120)));
    }
}
