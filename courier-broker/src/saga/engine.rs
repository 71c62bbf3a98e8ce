//! Saga 引擎（SagaEngine）
//!
//! 状态机：`pending -> running -> (completed | compensating -> failed)`。
//! - 正向推进是贪进式的：一步成功立即尝试下一步，不等下一个周期；
//! - 某步失败后进入补偿：对已完成步骤按逆序补偿，补偿失败只记录
//!   日志，不中断扫描，最终状态一律 `failed`；
//! - 同一 Saga 的步骤绝不并发，靠每实例的互斥锁保证；
//!   不同 Saga 之间相互独立推进；
//! - 已终态的 Saga 再次驱动为空操作；
//! - `incomplete()` 枚举全部非终态实例，供外部持久化协作方在重启后
//!   续驱（从 `current_step` 原地恢复，已完成步骤不会重跑）。
//!
use crate::error::{BrokerError, BrokerResult};
use crate::saga::step::{SagaStep, StepRecord, StepStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Saga 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    Pending,
    Running,
    Completed,
    Failed,
    Compensating,
}

impl SagaState {
    /// completed / failed 为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }
}

/// 引擎内部的 Saga 实例
struct SagaInstance {
    id: Uuid,
    saga_type: String,
    state: SagaState,
    steps: Vec<Arc<dyn SagaStep>>,
    records: Vec<StepRecord>,
    current_step: usize,
    context: Value,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

/// 对外暴露的只读快照
#[derive(Debug, Clone, Serialize)]
pub struct SagaSnapshot {
    id: Uuid,
    saga_type: String,
    state: SagaState,
    current_step: usize,
    context: Value,
    steps: Vec<StepRecord>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl SagaSnapshot {
    fn of(instance: &SagaInstance) -> Self {
        Self {
            id: instance.id,
            saga_type: instance.saga_type.clone(),
            state: instance.state,
            current_step: instance.current_step,
            context: instance.context.clone(),
            steps: instance.records.clone(),
            started_at: instance.started_at,
            ended_at: instance.ended_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }
}

/// Saga 引擎：创建、驱动与枚举
#[derive(Default)]
pub struct SagaEngine {
    sagas: DashMap<Uuid, Arc<Mutex<SagaInstance>>>,
}

impl SagaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个 pending 状态的 Saga，由周期驱动或 `drive` 推进
    pub fn start(&self, saga_type: &str, steps: Vec<Arc<dyn SagaStep>>, context: Value) -> Uuid {
        let id = Uuid::new_v4();
        let records = steps.iter().map(|s| StepRecord::new(s.name())).collect();
        let instance = SagaInstance {
            id,
            saga_type: saga_type.to_string(),
            state: SagaState::Pending,
            steps,
            records,
            current_step: 0,
            context,
            started_at: Utc::now(),
            ended_at: None,
        };

        self.sagas.insert(id, Arc::new(Mutex::new(instance)));
        tracing::debug!(saga_id = %id, saga_type, "saga started");
        id
    }

    /// 查询快照（驱动中的实例持有锁，读取会等待当前步骤让出）
    pub async fn snapshot(&self, id: Uuid) -> BrokerResult<SagaSnapshot> {
        let cell = self
            .sagas
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| BrokerError::not_found(format!("saga: {id}")))?;

        let instance = cell.lock().await;
        Ok(SagaSnapshot::of(&instance))
    }

    /// 枚举全部非终态 Saga（外部持久化协作方据此续驱）
    pub async fn incomplete(&self) -> Vec<SagaSnapshot> {
        let cells: Vec<Arc<Mutex<SagaInstance>>> =
            self.sagas.iter().map(|e| e.value().clone()).collect();

        let mut snapshots = Vec::new();
        for cell in cells {
            let instance = cell.lock().await;
            if !instance.state.is_terminal() {
                snapshots.push(SagaSnapshot::of(&instance));
            }
        }
        snapshots
    }

    /// 非终态 Saga 数量
    pub fn active_count(&self) -> usize {
        self.sagas
            .iter()
            .filter(|e| {
                e.value()
                    .try_lock()
                    .map(|i| !i.state.is_terminal())
                    .unwrap_or(true)
            })
            .count()
    }

    /// 驱动一个指定的 Saga 直到其让出（完成、失败或等待下一步）
    pub async fn drive(&self, id: Uuid) -> BrokerResult<()> {
        let cell = self
            .sagas
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| BrokerError::not_found(format!("saga: {id}")))?;

        let mut instance = cell.lock().await;
        Self::advance(&mut instance).await;
        Ok(())
    }

    /// 周期驱动：为每个实例独立派生任务，互不阻塞
    ///
    /// 已被驱动中的实例 try_lock 失败即跳过，避免任务堆积。
    pub(crate) fn drive_all(&self) {
        for entry in self.sagas.iter() {
            let cell = entry.value().clone();
            tokio::spawn(async move {
                let Ok(mut instance) = cell.try_lock() else {
                    return;
                };
                Self::advance(&mut instance).await;
            });
        }
    }

    /// 状态机推进（调用方已持有实例锁）
    async fn advance(instance: &mut SagaInstance) {
        if instance.state.is_terminal() {
            return;
        }
        instance.state = SagaState::Running;

        loop {
            let index = instance.current_step;
            if index >= instance.steps.len() {
                if instance
                    .records
                    .iter()
                    .all(|r| r.status() == StepStatus::Completed)
                {
                    instance.state = SagaState::Completed;
                    instance.ended_at = Some(Utc::now());
                    tracing::debug!(saga_id = %instance.id, "saga completed");
                }
                return;
            }

            // 重入保护：恢复续驱时跳过已完成的步骤
            if instance.records[index].status() == StepStatus::Completed {
                instance.current_step += 1;
                continue;
            }

            let step = instance.steps[index].clone();
            let context = instance.context.clone();
            match step.action(&context).await {
                Ok(result) => {
                    instance.records[index].complete(result.clone());
                    if let Value::Object(map) = &mut instance.context {
                        map.insert(step.name().to_string(), result);
                    }
                    instance.current_step += 1;
                    // 贪进式推进：成功即继续下一步，不等下一个周期
                }
                Err(err) => {
                    tracing::warn!(
                        saga_id = %instance.id,
                        step = step.name(),
                        error = %err,
                        "saga step failed, compensating"
                    );
                    instance.records[index].fail(err.to_string());
                    instance.state = SagaState::Compensating;
                    Self::compensate(instance, index).await;
                    instance.state = SagaState::Failed;
                    instance.ended_at = Some(Utc::now());
                    return;
                }
            }
        }
    }

    /// 对 `failed_index` 之前已完成的步骤按逆序补偿（尽力而为）
    async fn compensate(instance: &mut SagaInstance, failed_index: usize) {
        for index in (0..failed_index).rev() {
            if instance.records[index].status() != StepStatus::Completed {
                continue;
            }

            let step = instance.steps[index].clone();
            let context = instance.context.clone();
            match step.compensation(&context).await {
                Ok(()) => instance.records[index].compensate(None),
                Err(err) => {
                    // 补偿失败不中断扫描，剩余已完成步骤仍然尝试
                    tracing::error!(
                        saga_id = %instance.id,
                        step = step.name(),
                        error = %err,
                        "compensation failed, sweep continues"
                    );
                    instance.records[index].compensate(Some(err.to_string()));
                }
            }
        }
    }
}
