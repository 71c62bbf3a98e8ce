//! Broker 统一错误定义
//!
//! 聚焦路由投递、Saga 编排、队列/事件流前置校验等最小必要集合，
//! 处理器与 Saga 步骤内部的业务错误以 `anyhow::Error` 形态进入，
//! 在此统一转换为 `BrokerError` 并记录来源。
//!
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BrokerError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },

    // --- 投递/处理器 ---
    #[error("handler error: handler={handler}, reason={reason}")]
    Handler { handler: String, reason: String },

    // --- Saga 编排 ---
    #[error("saga step failed: saga={saga}, step={step}, reason={reason}")]
    SagaStep {
        saga: String,
        step: String,
        reason: String,
    },
    #[error("compensation failed: saga={saga}, step={step}, reason={reason}")]
    Compensation {
        saga: String,
        step: String,
        reason: String,
    },

    // --- 前置校验 ---
    #[error("not found: {reason}")]
    NotFound { reason: String },
    #[error("invalid stream version: stream={stream_id}, current={current}, expected={expected}")]
    InvalidStreamVersion {
        stream_id: String,
        current: u64,
        expected: u64,
    },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
}

/// 统一 Result 类型别名
pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    pub fn not_found(reason: impl Into<String>) -> Self {
        BrokerError::NotFound {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        BrokerError::InvalidState {
            reason: reason.into(),
        }
    }
}

impl From<uuid::Error> for BrokerError {
    fn from(err: uuid::Error) -> Self {
        BrokerError::Parse {
            reason: err.to_string(),
        }
    }
}
