//! 错误恢复
//!
//! - call_with_backoff：传输失败按 RetryConfig 指数退避重试，期间响应运行中止
//! - RecoveryEngine：子任务失败后决定重新排队（带反馈）还是永久失败

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::llm::{LlmError, RetryConfig};
use crate::plan::Subtask;

/// 一次受监管的模型调用为何没有结果
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// 重试用尽或不可重试
    Transport(LlmError),
    /// 运行被中止
    Cancelled,
}

pub async fn call_with_backoff<T, F, Fut>(
    retry: &RetryConfig,
    cancel: &CancellationToken,
    mut on_retry: impl FnMut(u32, &LlmError),
    mut op: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0u32;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            r = op() => r,
        };
        match result {
            Ok(v) => return Ok(v),
            Err(e) if retry.should_retry(attempt, &e) => {
                let delay = retry.delay_for(attempt, &e);
                attempt += 1;
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "transport failure, retrying");
                on_retry(attempt, &e);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CallError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(CallError::Transport(e)),
        }
    }
}

/// 子任务没有得到可接受结果的原因
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    Transport(LlmError),
    TurnBudget(usize),
    /// 验收未通过，携带评估意见
    Rejected(String),
    /// 全局预算耗尽（运行已中止）
    BudgetExhausted(String),
}

impl Failure {
    pub fn describe(&self) -> String {
        match self {
            Failure::Transport(e) => format!("transport error: {}", e),
            Failure::TurnBudget(max) => format!("turn budget of {} turns exhausted", max),
            Failure::Rejected(feedback) => format!("rejected by evaluator: {}", feedback),
            Failure::BudgetExhausted(reason) => format!("budget exhausted: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 回到 Pending，下次尝试带上这条反馈
    Requeue(String),
    /// 永久失败
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    max_subtask_retries: u32,
}

impl RecoveryEngine {
    pub fn new(max_subtask_retries: u32) -> Self {
        Self { max_subtask_retries }
    }

    /// attempts 为已进入 Running 的次数；首次之外最多再跑 max_subtask_retries 次
    pub fn handle(&self, subtask: &Subtask, failure: &Failure) -> RecoveryAction {
        let description = failure.describe();
        match failure {
            Failure::BudgetExhausted(_) => RecoveryAction::Fail(description),
            _ if subtask.attempts <= self.max_subtask_retries => {
                let feedback = match failure {
                    Failure::Rejected(feedback) => feedback.clone(),
                    _ => format!("The previous attempt did not finish ({}). Try again.", description),
                };
                RecoveryAction::Requeue(feedback)
            }
            _ => RecoveryAction::Fail(description),
        }
    }
}
