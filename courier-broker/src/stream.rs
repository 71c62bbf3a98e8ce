//! 事件流存储（EventStreamStore）
//!
//! 每个流维护一份仅追加、严格按版本排序的事件日志：
//! - 版本从 1 起严格递增且无空洞；
//! - 事件一经追加不可变；
//! - 保留期清理只删除过期事件，绝不重排存活事件的版本。
//!
//! 追加之后的派生发布（`event.<type>` 主题）由 Broker 门面负责编排。
//!
use crate::error::{BrokerError, BrokerResult};
use bon::Builder;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 已持久化的事件
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct StoredEvent {
    /// 事件唯一标识符
    id: Uuid,
    /// 事件所属流
    stream_id: String,
    /// 事件类型
    event_type: String,
    /// 事件负载
    data: Value,
    /// 附加元数据
    metadata: Value,
    /// 流内版本，从 1 起严格递增
    version: u64,
    /// 追加时间
    timestamp: DateTime<Utc>,
}

impl StoredEvent {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug, Default)]
struct EventStream {
    version: u64,
    events: Vec<StoredEvent>,
}

/// 事件流存储：按流组织的仅追加事件日志
#[derive(Default)]
pub struct EventStreamStore {
    streams: DashMap<String, EventStream>,
}

impl EventStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条事件，流不存在时以版本 0 惰性创建
    pub fn append(
        &self,
        stream_id: &str,
        event_type: &str,
        data: Value,
        metadata: Value,
    ) -> BrokerResult<StoredEvent> {
        self.append_expecting(stream_id, None, event_type, data, metadata)
    }

    /// 带乐观并发检查的追加：`expected_version` 不等于当前版本时拒绝
    pub fn append_expecting(
        &self,
        stream_id: &str,
        expected_version: Option<u64>,
        event_type: &str,
        data: Value,
        metadata: Value,
    ) -> BrokerResult<StoredEvent> {
        let mut stream = self.streams.entry(stream_id.to_string()).or_default();

        if let Some(expected) = expected_version {
            if stream.version != expected {
                return Err(BrokerError::InvalidStreamVersion {
                    stream_id: stream_id.to_string(),
                    current: stream.version,
                    expected,
                });
            }
        }

        let event = StoredEvent::builder()
            .id(Uuid::new_v4())
            .stream_id(stream_id.to_string())
            .event_type(event_type.to_string())
            .data(data)
            .metadata(metadata)
            .version(stream.version + 1)
            .timestamp(Utc::now())
            .build();

        stream.version += 1;
        stream.events.push(event.clone());

        Ok(event)
    }

    /// 读取某个流的事件，`from_version` 指定时只返回版本大于它的部分
    pub fn events(
        &self,
        stream_id: &str,
        from_version: Option<u64>,
    ) -> BrokerResult<Vec<StoredEvent>> {
        let stream = self
            .streams
            .get(stream_id)
            .ok_or_else(|| BrokerError::not_found(format!("stream: {stream_id}")))?;

        let from = from_version.unwrap_or(0);
        Ok(stream
            .events
            .iter()
            .filter(|e| e.version > from)
            .cloned()
            .collect())
    }

    /// 某个流的当前版本（不存在时为 NotFound）
    pub fn version(&self, stream_id: &str) -> BrokerResult<u64> {
        self.streams
            .get(stream_id)
            .map(|s| s.version)
            .ok_or_else(|| BrokerError::not_found(format!("stream: {stream_id}")))
    }

    /// 当前流总数
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// 保留期清理：删除早于窗口的事件，存活事件的版本保持不变
    pub(crate) fn sweep_retention(&self, window: Duration) {
        let cutoff = Utc::now() - window;

        for mut stream in self.streams.iter_mut() {
            let before = stream.events.len();
            stream.events.retain(|e| e.timestamp >= cutoff);
            let removed = before - stream.events.len();
            if removed > 0 {
                tracing::debug!(stream = %stream.key(), removed, "retention sweep dropped events");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(store: &EventStreamStore, stream: &str, ty: &str) -> StoredEvent {
        store
            .append(stream, ty, serde_json::json!({"n": 1}), Value::Null)
            .unwrap()
    }

    #[test]
    fn versions_are_dense_from_one() {
        let store = EventStreamStore::new();
        for _ in 0..5 {
            append(&store, "todo-1", "TodoCreated");
        }

        let versions: Vec<u64> = store
            .events("todo-1", None)
            .unwrap()
            .iter()
            .map(|e| e.version())
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.version("todo-1").unwrap(), 5);
    }

    #[test]
    fn events_from_version_is_exclusive() {
        let store = EventStreamStore::new();
        for _ in 0..4 {
            append(&store, "s", "E");
        }

        let tail = store.events("s", Some(2)).unwrap();
        let versions: Vec<u64> = tail.iter().map(|e| e.version()).collect();
        assert_eq!(versions, vec![3, 4]);
    }

    #[test]
    fn unknown_stream_is_not_found() {
        let store = EventStreamStore::new();
        assert!(matches!(
            store.events("missing", None),
            Err(BrokerError::NotFound { .. })
        ));
    }

    #[test]
    fn expected_version_mismatch_is_rejected() {
        let store = EventStreamStore::new();
        append(&store, "s", "E");

        let err = store
            .append_expecting("s", Some(0), "E", Value::Null, Value::Null)
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidStreamVersion { .. }));

        // 匹配当前版本时追加成功
        let ev = store
            .append_expecting("s", Some(1), "E", Value::Null, Value::Null)
            .unwrap();
        assert_eq!(ev.version(), 2);
    }

    #[test]
    fn retention_drops_old_events_without_renumbering() {
        let store = EventStreamStore::new();
        for _ in 0..3 {
            append(&store, "s", "E");
        }

        // 负窗口等价于全部过期
        store.sweep_retention(Duration::seconds(-1));
        assert!(store.events("s", None).unwrap().is_empty());

        // 后续追加延续原版本序列
        let ev = append(&store, "s", "E");
        assert_eq!(ev.version(), 4);
    }
}
