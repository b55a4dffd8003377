//! 工具注册表（能力表）
//!
//! 所有工具实现 Tool trait（schema / execute），由 ToolRegistry 按名注册与查找；
//! ToolExecutor 在调用时做 Schema 校验、超时与故障隔离。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::tools::{ToolInput, ToolSchema};

/// 工具 trait：声明静态 Schema，异步执行（input 为单个 key-value 映射）
///
/// `execute` 返回 Err 表示工具自身失败；调用方不会看到 panic，ToolExecutor 会把它转成错误结果。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 参数 Schema（名称、描述、参数声明）
    fn schema(&self) -> ToolSchema;

    /// 工具名称，默认取 schema().name
    fn name(&self) -> String {
        self.schema().name
    }

    /// 执行工具；调用前 input 已通过 schema 校验
    async fn execute(&self, input: &ToolInput) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，支持 register / get / schemas / tool_names
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具后注册者覆盖先注册者
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous handle replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 已注册工具名（排序后返回）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 按给定顺序返回工具的 Schema，未注册的名字被跳过
    pub fn schemas_for(&self, names: &[String]) -> Vec<ToolSchema> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.schema())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
