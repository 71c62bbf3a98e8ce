//! Saga 步骤协议（SagaStep）
//!
//! 步骤对引擎而言是黑盒：正向动作至多执行一次，补偿至多执行一次。
//! 动作的返回值以 `{步骤名: 结果}` 的形式合并进 Saga 上下文，
//! 供后续步骤读取。
//!
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 步骤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    Compensated,
}

/// 引擎维护的步骤执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    name: String,
    status: StepStatus,
    result: Option<Value>,
    error: Option<String>,
}

impl StepRecord {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn complete(&mut self, result: Value) {
        self.status = StepStatus::Completed;
        self.result = Some(result);
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
    }

    pub(crate) fn compensate(&mut self, error: Option<String>) {
        self.status = StepStatus::Compensated;
        if let Some(e) = error {
            self.error = Some(e);
        }
    }
}

/// Saga 步骤：正向动作与对应补偿
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// 步骤名称，同时作为结果合并进上下文时的键
    fn name(&self) -> &str;

    /// 正向动作，成功返回的结果会记录并合并进上下文
    async fn action(&self, context: &Value) -> anyhow::Result<Value>;

    /// 补偿动作，仅对已完成的步骤按逆序调用
    async fn compensation(&self, context: &Value) -> anyhow::Result<()>;
}

type ActionFn = Box<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;
type CompensationFn = Box<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 闭包适配器：无需手写 trait 实现即可定义步骤
pub struct FnStep {
    name: String,
    action: ActionFn,
    compensation: CompensationFn,
}

impl FnStep {
    pub fn new<A, AF, C, CF>(name: impl Into<String>, action: A, compensation: C) -> Self
    where
        A: Fn(Value) -> AF + Send + Sync + 'static,
        AF: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
        C: Fn(Value) -> CF + Send + Sync + 'static,
        CF: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(move |ctx| Box::pin(action(ctx))),
            compensation: Box::new(move |ctx| Box::pin(compensation(ctx))),
        }
    }
}

#[async_trait]
impl SagaStep for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn action(&self, context: &Value) -> anyhow::Result<Value> {
        (self.action)(context.clone()).await
    }

    async fn compensation(&self, context: &Value) -> anyhow::Result<()> {
        (self.compensation)(context.clone()).await
    }
}

impl std::fmt::Debug for FnStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish_non_exhaustive()
    }
}
