//! PromptedTransport：把纯文本 LlmClient 适配为 ModelTransport
//!
//! 工具描述与回复格式 Schema 拼进 system 消息；回复中的 JSON 工具调用被解析为 ToolRequest。
//! 支持三种形状：`{"tool": ..., "args": {...}}`、由它组成的数组、`{"tool_calls": [...]}`。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, ModelReply, ModelTransport};
use crate::memory::{Message, Role};
use crate::tools::{tool_call_schema_json, ToolRequest, ToolSchema};

pub struct PromptedTransport {
    llm: Arc<dyn LlmClient>,
}

impl PromptedTransport {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}

#[async_trait]
impl ModelTransport for PromptedTransport {
    async fn invoke(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ModelReply, LlmError> {
        if tools.is_empty() {
            let text = self.llm.complete(messages).await?;
            return Ok(ModelReply::Text(text.trim().to_string()));
        }
        let prompt = with_tool_instructions(messages, tools);
        let raw = self.llm.complete(&prompt).await?;
        Ok(parse_reply(&raw))
    }
}

fn tool_instructions(tools: &[ToolSchema]) -> String {
    let descriptors: Vec<Value> = tools.iter().map(|t| t.to_function_json()).collect();
    let descriptors = serde_json::to_string_pretty(&descriptors).unwrap_or_default();
    format!(
        "## Tools\nYou may call these tools:\n{descriptors}\n\n\
         To call tools, reply with JSON only, in this format:\n{}\n\n\
         When the task is done, reply with the final result as plain text.",
        tool_call_schema_json()
    )
}

/// 把工具说明并入首条 system 消息；没有 system 消息时插到最前面
fn with_tool_instructions(messages: &[Message], tools: &[ToolSchema]) -> Vec<Message> {
    let instructions = tool_instructions(tools);
    let mut out = messages.to_vec();
    match out.first_mut() {
        Some(first) if matches!(first.role, Role::System) => {
            first.content = format!("{}\n\n{}", first.content, instructions);
        }
        _ => out.insert(0, Message::system(instructions)),
    }
    out
}

/// 取出候选 JSON：```json 代码块，或整段以 { / [ 开头的回复
fn json_candidate(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }
    None
}

fn request_from(v: &Value) -> Option<ToolRequest> {
    let obj = v.as_object()?;
    let tool = obj.get("tool")?.as_str()?;
    if tool.is_empty() {
        return None;
    }
    let args = obj.get("args").cloned().unwrap_or(Value::Null);
    Some(ToolRequest::new(tool, args))
}

fn batch_from(items: &[Value]) -> Option<Vec<ToolRequest>> {
    items.iter().map(request_from).collect()
}

/// 解析模型回复：工具调用 / 纯文本 / 格式错误的工具调用
pub fn parse_reply(raw: &str) -> ModelReply {
    let trimmed = raw.trim();
    let Some(candidate) = json_candidate(trimmed) else {
        return ModelReply::Text(trimmed.to_string());
    };

    let value: Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(_) if candidate.contains("\"tool") => return ModelReply::Malformed(trimmed.to_string()),
        Err(_) => return ModelReply::Text(trimmed.to_string()),
    };

    match &value {
        Value::Object(obj) if obj.contains_key("tool_calls") => {
            match obj.get("tool_calls").and_then(|v| v.as_array()) {
                Some(items) if !items.is_empty() => match batch_from(items) {
                    Some(calls) => ModelReply::ToolCalls(calls),
                    None => ModelReply::Malformed(trimmed.to_string()),
                },
                _ => ModelReply::Malformed(trimmed.to_string()),
            }
        }
        Value::Object(obj) if obj.contains_key("tool") => match request_from(&value) {
            Some(call) => ModelReply::ToolCalls(vec![call]),
            None => ModelReply::Malformed(trimmed.to_string()),
        },
        Value::Array(items)
            if !items.is_empty() && items.iter().all(|i| i.get("tool").is_some()) =>
        {
            match batch_from(items) {
                Some(calls) => ModelReply::ToolCalls(calls),
                None => ModelReply::Malformed(trimmed.to_string()),
            }
        }
        _ => ModelReply::Text(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::ParamType;
    use serde_json::json;

    #[test]
    fn test_parse_single_call() {
        let reply = parse_reply(r#"{"tool": "read_file", "args": {"path": "src/lib.rs"}}"#);
        assert_eq!(
            reply,
            ModelReply::ToolCalls(vec![ToolRequest::new("read_file", json!({"path": "src/lib.rs"}))])
        );
    }

    #[test]
    fn test_parse_fenced_batch() {
        let raw = "Let me look.\n```json\n{\"tool_calls\": [{\"tool\": \"list_files\", \"args\": {}}, {\"tool\": \"read_file\", \"args\": {\"path\": \"a\"}}]}\n```";
        match parse_reply(raw) {
            ModelReply::ToolCalls(calls) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].tool, "list_files");
                assert_eq!(calls[1].tool, "read_file");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_array_of_calls() {
        let raw = r#"[{"tool": "echo", "args": {"text": "a"}}, {"tool": "echo", "args": {"text": "b"}}]"#;
        assert!(matches!(parse_reply(raw), ModelReply::ToolCalls(c) if c.len() == 2));
    }

    #[test]
    fn test_plain_text_and_code_are_final() {
        assert_eq!(parse_reply("  done  "), ModelReply::Text("done".into()));
        let code = "Patch applied:\nfn check(x: i32) -> bool { x > 0 }";
        assert_eq!(parse_reply(code), ModelReply::Text(code.into()));
        assert!(matches!(parse_reply(r#"{"summary": "ok"}"#), ModelReply::Text(_)));
    }

    #[test]
    fn test_broken_tool_json_is_malformed() {
        let raw = r#"{"tool": "read_file", "args": {"path": "a.rs"#;
        assert!(matches!(parse_reply(raw), ModelReply::Malformed(_)));
        assert!(matches!(parse_reply(r#"{"tool": 3}"#), ModelReply::Malformed(_)));
    }

    #[tokio::test]
    async fn test_tool_instructions_merged_into_system() {
        let mock = Arc::new(MockLlmClient::scripted(vec![
            r#"{"tool": "echo", "args": {"text": "hi"}}"#.to_string(),
        ]));
        let transport = PromptedTransport::new(mock.clone());
        let schema = ToolSchema::new("echo", "Echo").required("text", ParamType::String, "t");
        let reply = transport
            .invoke(&[Message::system("You are a coder."), Message::user("go")], &[schema])
            .await
            .unwrap();
        assert!(matches!(reply, ModelReply::ToolCalls(_)));

        let seen = mock.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 2);
        assert!(seen[0][0].content.starts_with("You are a coder."));
        assert!(seen[0][0].content.contains("\"name\": \"echo\""));
    }

    #[tokio::test]
    async fn test_no_tools_returns_text_verbatim() {
        let mock = Arc::new(MockLlmClient::scripted(vec![
            r#"[{"step": 1, "assignee": "CodingAgent", "task": "x"}]"#.to_string(),
        ]));
        let transport = PromptedTransport::new(mock);
        let reply = transport.invoke(&[Message::user("plan")], &[]).await.unwrap();
        assert!(matches!(reply, ModelReply::Text(t) if t.starts_with('[')));
    }
}
