//! 内置工具能力表
//!
//! 工具集合是封闭的：配置里只能按名字启用这里列出的工具，未知名字在构建阶段报错。

use std::path::Path;
use std::sync::Arc;

use crate::config::ToolsSection;
use crate::tools::{
    DeleteFileTool, EchoTool, EditFileTool, ListFilesTool, ReadFileTool, RunTestsTool, Tool,
    ToolRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    ReadFile,
    ListFiles,
    EditFile,
    DeleteFile,
    RunTests,
    Echo,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 6] = [
        BuiltinTool::ReadFile,
        BuiltinTool::ListFiles,
        BuiltinTool::EditFile,
        BuiltinTool::DeleteFile,
        BuiltinTool::RunTests,
        BuiltinTool::Echo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinTool::ReadFile => "read_file",
            BuiltinTool::ListFiles => "list_files",
            BuiltinTool::EditFile => "edit_file",
            BuiltinTool::DeleteFile => "delete_file",
            BuiltinTool::RunTests => "run_tests",
            BuiltinTool::Echo => "echo",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    fn instantiate(self, workspace: &Path, cfg: &ToolsSection) -> Arc<dyn Tool> {
        match self {
            BuiltinTool::ReadFile => Arc::new(ReadFileTool::new(workspace)),
            BuiltinTool::ListFiles => Arc::new(ListFilesTool::new(workspace)),
            BuiltinTool::EditFile => Arc::new(EditFileTool::new(workspace)),
            BuiltinTool::DeleteFile => Arc::new(DeleteFileTool::new(workspace)),
            BuiltinTool::RunTests => Arc::new(
                RunTestsTool::new(workspace, cfg.test_command.clone())
                    .with_timeout(cfg.test_timeout_secs),
            ),
            BuiltinTool::Echo => Arc::new(EchoTool),
        }
    }
}

/// 按 [tools].enabled 构建能力表；所有文件类工具共享同一个沙箱根目录
pub fn builtin_registry(workspace: &Path, cfg: &ToolsSection) -> Result<ToolRegistry, String> {
    let mut registry = ToolRegistry::new();
    for name in &cfg.enabled {
        let tool = BuiltinTool::from_name(name)
            .ok_or_else(|| format!("unknown built-in tool '{}'", name))?;
        registry.register_arc(tool.instantiate(workspace, cfg));
    }
    tracing::debug!(tools = ?registry.tool_names(), "tool registry built");
    Ok(registry)
}
