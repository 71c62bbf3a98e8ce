//! Saga 编排（saga）
//!
//! 多步长事务的状态机实现：正向按步推进，失败后按完成顺序的
//! 逆序执行补偿。提供：
//! - `SagaStep`：步骤协议（action/compensation）与闭包适配器；
//! - `SagaEngine`：创建、驱动、快照与未完成枚举。
//!
pub mod engine;
pub mod step;

pub use engine::{SagaEngine, SagaSnapshot, SagaState};
pub use step::{FnStep, SagaStep, StepRecord, StepStatus};
