//! 进程内消息 Broker 基础库（courier-broker）
//!
//! 在单进程内组合三类消息基础设施：
//! - 发布/订阅路由（`routing`）：精确主题与通配模式订阅，并发独立投递；
//! - 事件溯源流（`stream`）：按流仅追加、严格版本递增的事件日志，
//!   追加后在 `event.<类型>` 主题上发布派生通知；
//! - Saga 编排（`saga`）：多步长事务的正向推进与逆序补偿。
//!
//! 投递语义为至少一次：失败的投递按指数退避重试（`retry`），预算耗尽
//! 进入死信列表；幂等由处理器作者负责。持久化、外部传输与具体的
//! 日志/指标后端都是外部协作方，仅通过窄接口（`metrics`、`tracing`）消费。
//!
//! 典型用法：
//! 1. `Broker::new(config)` 构造一次，句柄传递给各协作方；
//! 2. `start()` 启动周期任务，得到 `BrokerHandle` 管理生命周期；
//! 3. 通过 `subscribe`/`publish`/`append_event`/`start_saga` 使用各子系统；
//! 4. `statistics()` 与 `dead_letter_messages()` 提供运行时观测。
//!
pub mod broker;
pub mod error;
pub mod message;
pub mod metrics;
pub mod queue;
mod retry;
pub mod routing;
pub mod saga;
pub mod stream;

pub use broker::{Broker, BrokerConfig, BrokerHandle, BrokerStatistics};
pub use error::{BrokerError, BrokerResult};
pub use message::{DeadLetterEntry, Message, PublishOptions};
pub use metrics::{MetricsSink, NoopMetrics};
pub use queue::{QueueDescriptor, QueueOptions, QueueStatistics, QueueType};
pub use routing::{HandlerId, MessageHandler, SubscribeOptions, TopicPattern};
pub use saga::{FnStep, SagaEngine, SagaSnapshot, SagaState, SagaStep, StepStatus};
pub use stream::{EventStreamStore, StoredEvent};
