//! 工具 Schema 描述符与输入校验
//!
//! 每个工具声明 `{name, description, parameters: {name -> {type, description, required}}}`，
//! 该描述符是数据而非代码：Agent 把它交给模型传输层，ToolExecutor 在调用前用它校验输入。
//! 另外用 schemars 生成「合法 tool call 回复」的 JSON Schema，拼入 system prompt。

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::ToolError;

/// 工具输入：单个 key-value 映射
pub type ToolInput = Map<String, Value>;

/// 参数类型（与 JSON Schema 基本类型对应）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// 值是否符合该类型（integer 同时被 number 接受）
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        };
        f.write_str(s)
    }
}

/// 单个参数的声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// 工具 Schema 描述符；parameters 使用 BTreeMap 以保证渲染顺序稳定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: BTreeMap<String, ParamSpec>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// 声明必填参数
    pub fn required(mut self, name: &str, kind: ParamType, description: &str) -> Self {
        self.parameters.insert(
            name.to_string(),
            ParamSpec {
                kind,
                description: description.to_string(),
                required: true,
            },
        );
        self
    }

    /// 声明可选参数
    pub fn optional(mut self, name: &str, kind: ParamType, description: &str) -> Self {
        self.parameters.insert(
            name.to_string(),
            ParamSpec {
                kind,
                description: description.to_string(),
                required: false,
            },
        );
        self
    }

    /// 在调用前校验输入：先检查必填键，再检查已给出值的类型；未声明的键放行
    pub fn validate(&self, input: &ToolInput) -> Result<(), ToolError> {
        for (key, spec) in &self.parameters {
            if spec.required && !input.contains_key(key) {
                return Err(ToolError::MissingKey(key.clone()));
            }
        }
        for (key, spec) in &self.parameters {
            match input.get(key) {
                Some(Value::Null) if !spec.required => {}
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(ToolError::WrongType {
                        key: key.clone(),
                        expected: spec.kind,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// 渲染为 function-calling 风格的 JSON Schema（OpenAI tools 格式）
    pub fn to_function_json(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "type": spec.kind.to_string(),
                        "description": spec.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&String> = self
            .parameters
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name)
            .collect();
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// 工具调用请求格式：`{"tool": "...", "args": {...}}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是可用工具之一
    pub tool: String,
    /// 工具参数：单个 key-value 映射，键为参数名
    pub args: HashMap<String, serde_json::Value>,
}

/// 一次回复里请求多个工具调用时的格式
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallBatchFormat {
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回工具调用（单个或批量）的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let single = schema_for!(ToolCallFormat);
    let batch = schema_for!(ToolCallBatchFormat);
    let single = serde_json::to_string_pretty(&single).unwrap_or_default();
    let batch = serde_json::to_string_pretty(&batch).unwrap_or_default();
    format!("Single call:\n{single}\n\nSeveral calls:\n{batch}")
}
