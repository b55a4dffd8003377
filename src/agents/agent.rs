//! Agent：一个角色的单轮执行单元
//!
//! 持有不可变的 AgentConfig、绑定的工具描述与模型传输。run_turn 在上下文前加上角色指令，
//! 交给传输层，返回最终结果、待执行的工具调用或格式错误的工具调用。Agent 之间从不直接调用。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agents::RoleKind;
use crate::llm::{LlmError, ModelReply, ModelTransport};
use crate::memory::Message;
use crate::tools::{ToolRequest, ToolSchema};

/// 已解析的角色配置（加载后不可变，由 AgentRegistry 持有）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub role: String,
    pub implementation: String,
    pub model: String,
    pub system_prompt: String,
    /// 该角色可调用的工具名（有序）
    pub tools: Vec<String>,
    /// 单个子任务的回合上限；None 时用编排器默认值
    pub max_turns: Option<usize>,
    pub params: HashMap<String, serde_json::Value>,
}

impl AgentConfig {
    /// 用默认指令与默认工具构造（测试与简单接线用）
    pub fn for_kind(role: impl Into<String>, kind: RoleKind) -> Self {
        Self {
            role: role.into(),
            implementation: kind.to_string(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: kind.default_prompt().to_string(),
            tools: kind.default_tools().iter().map(|t| t.to_string()).collect(),
            max_turns: None,
            params: HashMap::new(),
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }
}

/// 一轮的结果
#[derive(Debug, Clone, PartialEq)]
pub enum AgentTurn {
    Final(String),
    ToolCalls(Vec<ToolRequest>),
    Malformed(String),
}

pub struct Agent {
    config: AgentConfig,
    kind: RoleKind,
    schemas: Vec<ToolSchema>,
    transport: Arc<dyn ModelTransport>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("role", &self.config.role)
            .field("kind", &self.kind)
            .field("tools", &self.config.tools)
            .finish()
    }
}

impl Agent {
    pub(crate) fn new(
        config: AgentConfig,
        kind: RoleKind,
        schemas: Vec<ToolSchema>,
        transport: Arc<dyn ModelTransport>,
    ) -> Self {
        Self {
            config,
            kind,
            schemas,
            transport,
        }
    }

    pub fn role(&self) -> &str {
        &self.config.role
    }

    pub fn kind(&self) -> RoleKind {
        self.kind
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tool_names(&self) -> &[String] {
        &self.config.tools
    }

    pub fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    pub async fn run_turn(&self, context: &[Message]) -> Result<AgentTurn, LlmError> {
        let mut messages = Vec::with_capacity(context.len() + 1);
        if !self.config.system_prompt.is_empty() {
            messages.push(Message::system(self.config.system_prompt.clone()));
        }
        messages.extend_from_slice(context);

        let reply = self.transport.invoke(&messages, &self.schemas).await?;
        Ok(match reply {
            ModelReply::Text(text) => AgentTurn::Final(text),
            ModelReply::ToolCalls(calls) if calls.is_empty() => AgentTurn::Final(String::new()),
            ModelReply::ToolCalls(calls) => AgentTurn::ToolCalls(calls),
            ModelReply::Malformed(raw) => AgentTurn::Malformed(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedTransport;
    use crate::memory::Role;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_turn_prepends_instruction() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ModelReply::ToolCalls(vec![ToolRequest::new("read_file", json!({"path": "a"}))])),
            Ok(ModelReply::Text("patched".into())),
        ]));
        let agent = Agent::new(
            AgentConfig::for_kind("CodingAgent", RoleKind::Coding),
            RoleKind::Coding,
            Vec::new(),
            transport.clone(),
        );

        let ctx = vec![Message::user("fix it")];
        assert!(matches!(agent.run_turn(&ctx).await.unwrap(), AgentTurn::ToolCalls(c) if c.len() == 1));
        assert_eq!(agent.run_turn(&ctx).await.unwrap(), AgentTurn::Final("patched".into()));

        let seen = transport.seen();
        assert!(matches!(seen[0][0].role, Role::System));
        assert!(seen[0][0].content.contains("coding agent"));
        assert_eq!(seen[0][1].content, "fix it");
    }
}
