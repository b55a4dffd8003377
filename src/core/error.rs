//! 编排错误类型
//!
//! 只有 Configuration 会作为 Err 从 Orchestrator::run 返回；其余错误记录在 RunResult 里，
//! 作为子任务或整次运行的终止原因。

use thiserror::Error;

use crate::llm::LlmError;
use crate::plan::ValidationError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    /// 角色未知、实现标识未知、工具未注册等接线错误
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid plan: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] LlmError),

    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("Subtask '{id}' failed: {reason}")]
    SubtaskFailed { id: String, reason: String },
}
