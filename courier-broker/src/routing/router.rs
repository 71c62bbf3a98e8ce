//! 主题路由器（TopicRouter）
//!
//! 订阅以处理器 ID 为键存放在 arena 中，另维护两个索引：
//! - 精确主题 -> 订阅 ID 列表；
//! - 通配订阅 ID 列表（发布时逐个用编译后的模式匹配）。
//!
//! 匹配查询只读取索引并克隆 `Arc<Subscription>`，发布路径不持有写锁。
//!
use crate::routing::subscription::{HandlerId, MessageHandler, SubscribeOptions, Subscription};
use dashmap::DashMap;
use std::sync::{Arc, RwLock};

/// 主题路由器：订阅登记与匹配查询
#[derive(Default)]
pub struct TopicRouter {
    /// 订阅 arena，处理器 ID 为键
    arena: DashMap<HandlerId, Arc<Subscription>>,
    /// 精确主题索引
    exact: DashMap<String, Vec<HandlerId>>,
    /// 通配订阅索引
    patterns: RwLock<Vec<HandlerId>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条订阅并返回处理器 ID
    ///
    /// 含通配段的主题编译为模式索引，其余进入精确主题索引。
    pub fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
    ) -> HandlerId {
        let subscription = Arc::new(Subscription::new(topic, handler, options));
        let id = subscription.id();
        let is_pattern = subscription.pattern().is_some();

        self.arena.insert(id, subscription);
        if is_pattern {
            if let Ok(mut patterns) = self.patterns.write() {
                patterns.push(id);
            }
        } else {
            self.exact.entry(topic.to_string()).or_default().push(id);
        }

        tracing::debug!(topic, handler_id = %id, is_pattern, "subscription registered");
        id
    }

    /// 取消订阅；ID 不存在时为空操作
    ///
    /// 已经排入延迟重试的消息不会被撤销，重试触发时查不到订阅即丢弃。
    pub fn unsubscribe(&self, topic: &str, id: HandlerId) {
        if self.arena.remove(&id).is_none() {
            return;
        }

        if let Some(mut ids) = self.exact.get_mut(topic) {
            ids.retain(|x| *x != id);
        }
        if let Ok(mut patterns) = self.patterns.write() {
            patterns.retain(|x| *x != id);
        }

        tracing::debug!(topic, handler_id = %id, "subscription removed");
    }

    /// 按 ID 查找订阅（重试路径使用；订阅可能已被取消）
    pub fn get(&self, id: HandlerId) -> Option<Arc<Subscription>> {
        self.arena.get(&id).map(|s| s.value().clone())
    }

    /// 返回命中某个具体主题的全部订阅：精确订阅 + 模式命中的通配订阅
    pub fn matching(&self, topic: &str) -> Vec<Arc<Subscription>> {
        let mut merged: Vec<Arc<Subscription>> = Vec::new();

        if let Some(ids) = self.exact.get(topic) {
            for id in ids.iter() {
                if let Some(sub) = self.arena.get(id) {
                    merged.push(sub.value().clone());
                }
            }
        }

        let pattern_ids: Vec<HandlerId> = match self.patterns.read() {
            Ok(patterns) => patterns.clone(),
            Err(_) => Vec::new(),
        };
        for id in pattern_ids {
            if let Some(sub) = self.arena.get(&id) {
                let sub = sub.value().clone();
                if sub.pattern().is_some_and(|p| p.matches(topic)) {
                    merged.push(sub);
                }
            }
        }

        merged
    }

    /// 当前订阅总数
    pub fn subscription_count(&self) -> usize {
        self.arena.len()
    }

    /// 某主题的精确订阅数（队列统计使用）
    pub fn consumers_of(&self, topic: &str) -> usize {
        self.exact.get(topic).map(|ids| ids.len()).unwrap_or(0)
    }
}
