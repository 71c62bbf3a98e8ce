//! 重试控制器（RetryController）
//!
//! 以显式的延迟任务队列驱动重试，替代嵌套定时回调：
//! - 失败的 (消息, 处理器) 投递按 `2^k x retry_delay` 指数退避入队；
//! - 单一调度循环从 `DelayQueue`（按触发时间的最小堆）取出到期任务重投；
//! - 重试预算耗尽的消息标注失败现场后进入死信列表，永不再试；
//! - 订阅已取消时到期任务查不到处理器，直接丢弃。
//!
use crate::message::{DeadLetterEntry, Message};
use crate::metrics::MetricsSink;
use crate::routing::{HandlerId, Subscription, TopicRouter};
use chrono::Utc;
use futures_util::future::poll_fn;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

/// 一次待重投的 (消息, 处理器) 组合
struct RetryEntry {
    message: Message,
    handler_id: HandlerId,
}

/// 重试控制器：包裹处理器执行，失败退避重试，耗尽后死信
pub(crate) struct RetryController {
    router: Arc<TopicRouter>,
    dead_letters: Arc<Mutex<Vec<DeadLetterEntry>>>,
    metrics: Arc<dyn MetricsSink>,
    tx: mpsc::UnboundedSender<(RetryEntry, Duration)>,
    /// 调度循环启动时一次性取走
    rx: Mutex<Option<mpsc::UnboundedReceiver<(RetryEntry, Duration)>>>,
}

impl RetryController {
    pub(crate) fn new(
        router: Arc<TopicRouter>,
        dead_letters: Arc<Mutex<Vec<DeadLetterEntry>>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            router,
            dead_letters,
            metrics,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// 对单个订阅执行一次投递（首投与重投共用）
    ///
    /// 成功时上报处理耗时；失败时递增 retry_count，预算内入延迟队列，
    /// 预算耗尽则进入死信列表。
    pub(crate) async fn attempt(&self, mut message: Message, subscription: Arc<Subscription>) {
        if message.expired(Utc::now()) {
            tracing::debug!(
                topic = message.topic(),
                message_id = %message.id(),
                "message ttl elapsed, dropped before dispatch"
            );
            return;
        }

        let started = Instant::now();
        match subscription.handler().handle(&message).await {
            Ok(()) => {
                self.metrics
                    .observe_processing(message.topic(), started.elapsed());
            }
            Err(err) => {
                message.record_retry();
                if message.retries_exhausted() {
                    self.dead_letter(message, subscription.id(), &err);
                } else {
                    let retries = message.metadata().retry_count();
                    let delay = backoff_delay(subscription.options().retry_delay(), retries);
                    tracing::debug!(
                        topic = message.topic(),
                        message_id = %message.id(),
                        handler_id = %subscription.id(),
                        retries,
                        ?delay,
                        error = %err,
                        "handler failed, retry scheduled"
                    );

                    let entry = RetryEntry {
                        message,
                        handler_id: subscription.id(),
                    };
                    // 调度循环未启动时发送也不会失败，条目在循环启动后统一消费
                    let _ = self.tx.send((entry, delay));
                }
            }
        }
    }

    fn dead_letter(&self, message: Message, handler_id: HandlerId, err: &anyhow::Error) {
        let topic = message.topic().to_string();
        tracing::warn!(
            topic = %topic,
            message_id = %message.id(),
            handler_id = %handler_id,
            retries = message.metadata().retry_count(),
            error = %err,
            "retries exhausted, message dead-lettered"
        );
        self.metrics.incr_dead_lettered(&topic);

        let entry = DeadLetterEntry::builder()
            .message(message)
            .original_topic(topic)
            .handler_id(handler_id)
            .error(err.to_string())
            .failed_at(Utc::now())
            .build();

        if let Ok(mut list) = self.dead_letters.lock() {
            list.push(entry);
        }
    }

    /// 单一调度循环：接收退避任务入堆，到期后按处理器 ID 重投
    pub(crate) async fn scheduler_loop(self: Arc<Self>, token: CancellationToken) {
        let Some(mut rx) = self.rx.lock().ok().and_then(|mut slot| slot.take()) else {
            tracing::warn!("retry scheduler already running, refusing second loop");
            return;
        };

        let mut queue: DelayQueue<RetryEntry> = DelayQueue::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                submitted = rx.recv() => {
                    match submitted {
                        Some((entry, delay)) => {
                            queue.insert(entry, delay);
                        }
                        None => break,
                    }
                }
                expired = poll_fn(|cx| queue.poll_expired(cx)), if !queue.is_empty() => {
                    if let Some(expired) = expired {
                        let entry = expired.into_inner();
                        let this = self.clone();
                        tokio::spawn(async move { this.redispatch(entry).await });
                    }
                }
            }
        }
    }

    async fn redispatch(&self, entry: RetryEntry) {
        match self.router.get(entry.handler_id) {
            Some(subscription) => self.attempt(entry.message, subscription).await,
            None => {
                // 订阅已取消，重试目标不复存在
                tracing::debug!(
                    handler_id = %entry.handler_id,
                    message_id = %entry.message.id(),
                    "retry target unsubscribed, dropped"
                );
            }
        }
    }
}

/// 第 k 次重试的退避延迟：`2^k x base`
fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(1u32.checked_shl(retry_count).unwrap_or(u32::MAX))
}
