//! Mock LLM 客户端与脚本化传输（用于测试，无需 API）
//!
//! - MockLlmClient：按顺序返回预置回复，用完后回显最后一条 User 消息；记录收到的每次请求
//! - ScriptedTransport：直接返回预置的 ModelReply / LlmError，可加固定延迟，便于驱动编排流程

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ModelReply, ModelTransport};
use crate::memory::{Message, Role};
use crate::tools::ToolSchema;

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::User))
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

/// Mock 客户端：脚本回复用完后回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(replies: Vec<String>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        Ok(next.unwrap_or_else(|| {
            let input: String = last_user(messages).chars().take(200).collect();
            format!("Echo from Mock: {}", input)
        }))
    }
}

/// 脚本化 ModelTransport：依次返回预置结果，用完后返回 fallback
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
    fallback: ModelReply,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<ModelReply, LlmError>>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            fallback: ModelReply::Text("done".to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 全部回复都是最终文本
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| Ok(ModelReply::Text(t.into()))).collect())
    }

    pub fn with_fallback(mut self, reply: ModelReply) -> Self {
        self.fallback = reply;
        self
    }

    /// 每次调用前等待（模拟慢模型）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn invoke(&self, messages: &[Message], _tools: &[ToolSchema]) -> Result<ModelReply, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut s) = self.seen.lock() {
            s.push(messages.to_vec());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_script_then_echo() {
        let mock = MockLlmClient::scripted(vec!["first".into()]);
        let msgs = vec![Message::user("hello")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "first");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "Echo from Mock: hello");
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_transport_errors_then_fallback() {
        let t = ScriptedTransport::new(vec![Err(LlmError::Timeout)]);
        assert_eq!(t.invoke(&[], &[]).await, Err(LlmError::Timeout));
        assert_eq!(t.invoke(&[], &[]).await, Ok(ModelReply::Text("done".into())));
        assert_eq!(t.calls(), 2);
    }
}
