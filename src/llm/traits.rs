//! LLM 客户端与模型传输抽象
//!
//! - LlmClient：纯文本补全（OpenAI 兼容 / Mock）
//! - ModelTransport：上下文 + 工具描述 -> ModelReply（文本 / 工具调用 / 格式错误的工具调用）
//! - LlmError / RetryConfig：传输失败的分类与指数退避策略

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::RetrySection;
use crate::memory::Message;
use crate::tools::{ToolRequest, ToolSchema};

/// 模型调用失败（网络、超时、限流、接口错误）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("LLM network error: {0}")]
    Network(String),

    #[error("LLM API error: {0}")]
    Api(String),

    /// 请求本身不合法（构造失败、鉴权失败），重试无意义
    #[error("LLM request rejected: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::InvalidRequest(_))
    }
}

/// 指数退避：第 n 次重试等待 base * 2^n，封顶 max；限流时优先使用服务端给出的等待时间
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySection::default())
    }
}

impl From<&RetrySection> for RetryConfig {
    fn from(s: &RetrySection) -> Self {
        Self {
            max_retries: s.max_retries,
            base_delay_ms: s.base_delay_ms,
            max_delay_ms: s.max_delay_ms,
        }
    }
}

impl RetryConfig {
    pub fn delay_for(&self, attempt: u32, err: &LlmError) -> Duration {
        if let LlmError::RateLimited {
            retry_after_ms: Some(ms),
        } = err
        {
            return Duration::from_millis((*ms).min(self.max_delay_ms));
        }
        let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// 是否还应重试（attempt 从 0 开始计数已发生的重试）
    pub fn should_retry(&self, attempt: u32, err: &LlmError) -> bool {
        err.is_retryable() && attempt < self.max_retries
    }
}

/// LLM 客户端 trait：非流式文本补全
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 一次模型调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Text(String),
    ToolCalls(Vec<ToolRequest>),
    /// 模型想调用工具但 JSON 无法解析，携带原文
    Malformed(String),
}

/// 模型传输：接收上下文与可用工具描述，返回 ModelReply
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn invoke(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ModelReply, LlmError>;
}
