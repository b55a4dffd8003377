//! 编排器构建器：统一的初始化逻辑
//!
//! 配置 -> 内置工具注册表（可追加自定义工具）-> 角色配置解析 -> AgentRegistry -> ToolExecutor -> Orchestrator。
//! 测试与 CLI 共用同一条装配路径，只替换传输层工厂。

use std::path::PathBuf;
use std::sync::Arc;

use crate::agents::AgentRegistry;
use crate::config::AppConfig;
use crate::core::{Orchestrator, OrchestratorError};
use crate::llm::{transport_factory, RetryConfig, TransportFactory};
use crate::tools::{builtin_registry, Tool, ToolExecutor};

pub struct OrchestratorBuilder {
    config: AppConfig,
    workspace: PathBuf,
    factory: Option<TransportFactory>,
    extra_tools: Vec<Arc<dyn Tool>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workspace: workspace.into(),
            factory: None,
            extra_tools: Vec::new(),
        }
    }

    /// 替换模型传输层（默认按 [llm] 段选择 OpenAI 或 Mock）
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// 追加一个自定义工具；与内置工具同名时覆盖之
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let mut tools = builtin_registry(&self.workspace, &self.config.tools)
            .map_err(OrchestratorError::Configuration)?;
        for tool in self.extra_tools {
            tools.register_arc(tool);
        }
        let tools = Arc::new(tools);
        tracing::info!(tools = ?tools.tool_names(), workspace = %self.workspace.display(), "tool registry ready");

        let configs = self.config.agent_configs()?;
        let factory = self
            .factory
            .unwrap_or_else(|| transport_factory(&self.config.llm));
        let registry = AgentRegistry::new(configs, tools.clone(), factory);
        for role in registry.roles() {
            registry.check(&role)?;
        }

        let executor = ToolExecutor::new(tools, self.config.tools.tool_timeout_secs);
        Ok(Orchestrator::new(
            Arc::new(registry),
            Arc::new(executor),
            self.config.orchestrator.clone(),
            RetryConfig::from(&self.config.llm.retry),
        ))
    }
}
