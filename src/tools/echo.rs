//! Echo 工具（测试用）

use async_trait::async_trait;

use crate::tools::{ParamType, Tool, ToolInput, ToolSchema};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("echo", "Echo text back (for testing).")
            .required("text", ParamType::String, "Text to echo")
    }

    async fn execute(&self, input: &ToolInput) -> Result<String, String> {
        let text = input
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(text.to_string())
    }
}
