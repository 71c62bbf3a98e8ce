//! Broker 门面（Broker）
//!
//! 聚合路由、重试、队列、事件流与 Saga 编排的公开表面：
//! - 显式对象，启动时构造一次并以句柄传递，不使用全局单例；
//! - `start` 启动周期任务（队列统计、Saga 驱动、保留期清理、重试调度），
//!   返回可关闭/等待的 `BrokerHandle`；
//! - 发布方永远观察不到下游处理器的失败，死信列表是不可恢复失败的
//!   唯一可检视信号。
//!
use crate::error::BrokerResult;
use crate::message::{DeadLetterEntry, Message, PublishOptions};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::queue::{QueueDescriptor, QueueStatistics, QueueStore};
use crate::retry::RetryController;
use crate::routing::{HandlerId, MessageHandler, SubscribeOptions, TopicRouter};
use crate::saga::step::SagaStep;
use crate::saga::{SagaEngine, SagaSnapshot};
use crate::stream::{EventStreamStore, StoredEvent};
use futures_util::{StreamExt, stream};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Broker 配置
#[derive(Clone, Copy, Debug)]
pub struct BrokerConfig {
    /// 队列统计重算间隔
    pub stats_interval: Duration,
    /// Saga 驱动间隔
    pub saga_tick_interval: Duration,
    /// 事件保留期清理间隔
    pub retention_interval: Duration,
    /// 事件保留窗口
    pub retention_window: chrono::Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            stats_interval: Duration::from_secs(5),
            saga_tick_interval: Duration::from_millis(500),
            retention_interval: Duration::from_secs(3600),
            retention_window: chrono::Duration::days(30),
        }
    }
}

/// 只读统计快照
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BrokerStatistics {
    queue_count: usize,
    buffered_messages: usize,
    subscription_count: usize,
    stream_count: usize,
    active_sagas: usize,
    dead_letter_count: usize,
}

impl BrokerStatistics {
    pub fn queue_count(&self) -> usize {
        self.queue_count
    }

    pub fn buffered_messages(&self) -> usize {
        self.buffered_messages
    }

    pub fn subscription_count(&self) -> usize {
        self.subscription_count
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count
    }

    pub fn active_sagas(&self) -> usize {
        self.active_sagas
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letter_count
    }
}

/// 进程内消息 Broker
pub struct Broker {
    router: Arc<TopicRouter>,
    retry: Arc<RetryController>,
    queues: Arc<QueueStore>,
    streams: Arc<EventStreamStore>,
    sagas: Arc<SagaEngine>,
    dead_letters: Arc<Mutex<Vec<DeadLetterEntry>>>,
    metrics: Arc<dyn MetricsSink>,
    config: BrokerConfig,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// 指定指标槽的构造（指标失败不影响 Broker 正确性）
    pub fn with_metrics(config: BrokerConfig, metrics: Arc<dyn MetricsSink>) -> Arc<Self> {
        let router = Arc::new(TopicRouter::new());
        let dead_letters = Arc::new(Mutex::new(Vec::new()));
        let retry = Arc::new(RetryController::new(
            router.clone(),
            dead_letters.clone(),
            metrics.clone(),
        ));

        Arc::new(Self {
            router,
            retry,
            queues: Arc::new(QueueStore::new()),
            streams: Arc::new(EventStreamStore::new()),
            sagas: Arc::new(SagaEngine::new()),
            dead_letters,
            metrics,
            config,
        })
    }

    /// 启动周期任务，返回可用于关闭/等待的句柄
    pub fn start(self: &Arc<Self>) -> BrokerHandle {
        let token = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(4);

        // 队列统计重算（周期任务）
        {
            let queues = self.queues.clone();
            let router = self.router.clone();
            let interval = self.config.stats_interval;

            tasks.push(Self::spawn_periodic(token.clone(), interval, move || {
                let queues = queues.clone();
                let router = router.clone();
                async move { queues.sweep(&router, interval) }
            }));
        }

        // Saga 驱动（周期任务）
        {
            let sagas = self.sagas.clone();
            let interval = self.config.saga_tick_interval;

            tasks.push(Self::spawn_periodic(token.clone(), interval, move || {
                let sagas = sagas.clone();
                async move { sagas.drive_all() }
            }));
        }

        // 事件保留期清理（周期任务）
        {
            let streams = self.streams.clone();
            let window = self.config.retention_window;
            let interval = self.config.retention_interval;

            tasks.push(Self::spawn_periodic(token.clone(), interval, move || {
                let streams = streams.clone();
                async move { streams.sweep_retention(window) }
            }));
        }

        // 重试调度循环（长循环）
        tasks.push(tokio::spawn(
            self.retry.clone().scheduler_loop(token.clone()),
        ));

        tracing::info!("broker started");
        BrokerHandle { token, tasks }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    // --- 发布/订阅 ---

    /// 发布一条消息，返回消息 ID
    ///
    /// 对发布方即发即忘：匹配处理器在独立任务中并发执行、全部等待，
    /// 任何处理器失败都不会传播回来。与主题同名的队列额外缓存一份副本。
    pub fn publish(&self, topic: &str, payload: Value, options: PublishOptions) -> Uuid {
        let message = Message::compose(topic, payload, options);
        let message_id = message.id();

        self.metrics.incr_published(topic);
        self.queues.buffer(topic, &message);

        let subscriptions = self.router.matching(topic);
        if !subscriptions.is_empty() {
            let retry = self.retry.clone();
            tokio::spawn(async move {
                stream::iter(subscriptions)
                    .for_each_concurrent(None, move |subscription| {
                        let message = message.clone();
                        let retry = retry.clone();
                        async move { retry.attempt(message, subscription).await }
                    })
                    .await;
            });
        }

        message_id
    }

    /// 登记订阅并返回处理器 ID；含通配段的主题按模式匹配
    pub fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
    ) -> HandlerId {
        self.router.subscribe(topic, handler, options)
    }

    /// 取消订阅；ID 不存在时为空操作
    pub fn unsubscribe(&self, topic: &str, id: HandlerId) {
        self.router.unsubscribe(topic, id);
    }

    // --- 队列 ---

    pub fn create_queue(&self, descriptor: QueueDescriptor) -> BrokerResult<()> {
        self.queues.create(descriptor)
    }

    pub fn get_queue(&self, name: &str) -> BrokerResult<(QueueDescriptor, QueueStatistics)> {
        self.queues.get(name)
    }

    // --- 事件流 ---

    /// 追加一条事件并在 `event.<类型>` 主题上发布派生消息
    pub fn append_event(
        &self,
        stream_id: &str,
        event_type: &str,
        data: Value,
        metadata: Value,
    ) -> BrokerResult<Uuid> {
        let event = self.streams.append(stream_id, event_type, data, metadata)?;
        self.publish_event_notification(&event);
        Ok(event.id())
    }

    fn publish_event_notification(&self, event: &StoredEvent) {
        let topic = format!("event.{}", event.event_type());
        let payload = serde_json::json!({
            "event_id": event.id(),
            "stream_id": event.stream_id(),
            "event_type": event.event_type(),
            "data": event.data(),
            "version": event.version(),
        });
        let options = PublishOptions::builder()
            .message_type(event.event_type().to_string())
            .source(format!("stream:{}", event.stream_id()))
            .build();

        self.publish(&topic, payload, options);
    }

    /// 读取事件，`from_version` 指定时只返回版本大于它的部分
    pub fn get_events(
        &self,
        stream_id: &str,
        from_version: Option<u64>,
    ) -> BrokerResult<Vec<StoredEvent>> {
        self.streams.events(stream_id, from_version)
    }

    // --- Saga ---

    /// 创建一个 Saga；失败只会体现在终态快照上，不会从这里抛出
    pub fn start_saga(
        &self,
        saga_type: &str,
        steps: Vec<Arc<dyn SagaStep>>,
        context: Value,
    ) -> Uuid {
        self.sagas.start(saga_type, steps, context)
    }

    pub async fn get_saga(&self, id: Uuid) -> BrokerResult<SagaSnapshot> {
        self.sagas.snapshot(id).await
    }

    /// 驱动一个指定 Saga 直到让出（测试与外部续驱使用；周期驱动之外的补充）
    pub async fn drive_saga(&self, id: Uuid) -> BrokerResult<()> {
        self.sagas.drive(id).await
    }

    /// 枚举未完成的 Saga，供外部持久化协作方续驱
    pub async fn incomplete_sagas(&self) -> Vec<SagaSnapshot> {
        self.sagas.incomplete().await
    }

    // --- 观测 ---

    /// 只读统计快照
    pub fn statistics(&self) -> BrokerStatistics {
        BrokerStatistics {
            queue_count: self.queues.queue_count(),
            buffered_messages: self.queues.buffered_total(),
            subscription_count: self.router.subscription_count(),
            stream_count: self.streams.stream_count(),
            active_sagas: self.sagas.active_count(),
            dead_letter_count: self
                .dead_letters
                .lock()
                .map(|l| l.len())
                .unwrap_or(0),
        }
    }

    /// 死信列表快照
    pub fn dead_letter_messages(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }
}

/// Broker 运行句柄：用于优雅关闭与等待任务结束
pub struct BrokerHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl BrokerHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
