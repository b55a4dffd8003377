//! 工具执行器（调用边界）
//!
//! 持有 ToolRegistry 与全局超时。invoke 依次做：查找工具 -> 角色绑定检查 -> 输入形状与 Schema 校验
//! -> 超时内执行并捕获 panic；任何故障都转为带 is_error 标记的字符串结果，绝不向调用方抛出。
//! 每次调用输出结构化审计日志（JSON）。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;

use crate::tools::{ToolError, ToolRegistry};

/// 模型请求的一次工具调用（尚未执行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// 一次已完成的工具调用：输入、结果字符串与错误标记
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub input: Value,
    pub output: String,
    pub is_error: bool,
    pub duration_ms: u64,
}

/// 工具执行器：对每次调用施加校验、超时与故障隔离
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 以 role 身份调用工具；allowed 为该角色绑定的工具名
    pub async fn invoke(&self, role: &str, allowed: &[String], request: &ToolRequest) -> ToolCall {
        let start = Instant::now();
        let outcome = self.run(role, allowed, request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (output, is_error, kind) = match outcome {
            Ok(out) => (out, false, "ok"),
            Err(e) => {
                let kind = match &e {
                    ToolError::Timeout { .. } => "timeout",
                    ToolError::Panicked { .. } => "panic",
                    ToolError::Failed { .. } => "error",
                    _ => "rejected",
                };
                (e.to_string(), true, kind)
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "role": role,
            "tool": request.tool,
            "ok": !is_error,
            "outcome": kind,
            "duration_ms": duration_ms,
            "args_preview": args_preview(&request.args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        ToolCall {
            tool: request.tool.clone(),
            input: request.args.clone(),
            output,
            is_error,
            duration_ms,
        }
    }

    async fn run(&self, role: &str, allowed: &[String], request: &ToolRequest) -> Result<String, ToolError> {
        let name = request.tool.as_str();
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        if !allowed.iter().any(|a| a == name) {
            return Err(ToolError::NotBound {
                tool: name.to_string(),
                role: role.to_string(),
            });
        }

        let input = match &request.args {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => return Err(ToolError::InvalidInput(json_kind(other).to_string())),
        };
        tool.schema().validate(&input)?;

        let fut = AssertUnwindSafe(tool.execute(&input)).catch_unwind();
        match timeout(self.timeout, fut).await {
            Ok(Ok(Ok(out))) => Ok(out),
            Ok(Ok(Err(message))) => Err(ToolError::Failed {
                tool: name.to_string(),
                message,
            }),
            Ok(Err(payload)) => Err(ToolError::Panicked {
                tool: name.to_string(),
                message: panic_message(payload),
            }),
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
