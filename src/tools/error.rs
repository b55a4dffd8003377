//! 工具层错误
//!
//! ToolError 永远不会越过 ToolExecutor 的边界：它被渲染成 `Error: ...` 字符串，
//! 作为带错误标记的工具结果写回上下文。

use thiserror::Error;

use crate::tools::ParamType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Error: Missing required key '{0}' in input_data.")]
    MissingKey(String),

    #[error("Error: Key '{key}' must be of type {expected}.")]
    WrongType { key: String, expected: ParamType },

    #[error("Error: Tool input must be a JSON object, got {0}.")]
    InvalidInput(String),

    #[error("Error: Unknown tool '{0}'.")]
    UnknownTool(String),

    #[error("Error: Tool '{tool}' is not available to role '{role}'.")]
    NotBound { tool: String, role: String },

    #[error("Error: Tool '{tool}' timed out after {secs}s.")]
    Timeout { tool: String, secs: u64 },

    #[error("Error: Tool '{tool}' crashed: {message}")]
    Panicked { tool: String, message: String },

    #[error("Error: Tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}
