//! LLM 层：客户端抽象、模型传输与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;
pub mod transport;

use std::sync::Arc;

pub use mock::{MockLlmClient, ScriptedTransport};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, ModelReply, ModelTransport, RetryConfig};
pub use transport::{parse_reply, PromptedTransport};

use crate::agents::AgentConfig;
use crate::config::LlmSection;

/// 按角色配置构造模型传输（注册表构造 Agent 时调用）
pub type TransportFactory = Arc<dyn Fn(&AgentConfig) -> Arc<dyn ModelTransport> + Send + Sync>;

/// 默认工厂：provider = openai 且有 OPENAI_API_KEY 时用 OpenAiClient，否则 MockLlmClient
pub fn transport_factory(llm: &LlmSection) -> TransportFactory {
    let llm = llm.clone();
    let has_key = std::env::var("OPENAI_API_KEY").map(|k| !k.is_empty()).unwrap_or(false);
    if llm.provider == "openai" && !has_key {
        tracing::warn!("OPENAI_API_KEY not set, using mock LLM client");
    }
    Arc::new(move |cfg: &AgentConfig| {
        let client: Arc<dyn LlmClient> = if llm.provider == "openai" && has_key {
            Arc::new(
                OpenAiClient::new(llm.base_url.as_deref(), &cfg.model, None)
                    .with_timeout(llm.request_timeout_secs),
            )
        } else {
            Arc::new(MockLlmClient::new())
        };
        Arc::new(PromptedTransport::new(client)) as Arc<dyn ModelTransport>
    })
}
