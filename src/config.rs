//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__MODEL=gpt-4o`）。
//! 角色定义放在 `[[agents]]` 数组中；每个角色可再指向一个 TOML 设置文件（system_prompt / tools / 预算 / params）。

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::agents::{AgentConfig, RoleKind};
use crate::core::OrchestratorError;
use crate::tools::BuiltinTool;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub orchestrator: OrchestratorSection,
    pub agents: Vec<AgentEntry>,
}

/// [app] 段：应用名、工作目录、日志级别
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工具沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 默认日志级别，RUST_LOG 优先
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            log_level: "info".to_string(),
        }
    }
}

/// [llm] 段：后端选择、默认模型、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 需要 OPENAI_API_KEY，缺失时回退 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            request_timeout_secs: 60,
            retry: RetrySection::default(),
        }
    }
}

/// [llm.retry] 段：传输层失败的指数退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// [tools] 段：启用的内置工具、工具超时、测试命令
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 注册到能力表的内置工具名
    pub enabled: Vec<String>,
    /// run_tests 执行的命令（程序名 + 固定参数）
    pub test_command: Vec<String>,
    pub test_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            enabled: BuiltinTool::ALL.iter().map(|t| t.name().to_string()).collect(),
            test_command: vec!["cargo".into(), "test".into()],
            test_timeout_secs: 300,
        }
    }
}

/// [orchestrator] 段：角色名、并发、预算、重试与重规划策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub decomposer_role: String,
    pub evaluator_role: String,
    /// 同时运行的子任务上限（worker 池大小）
    pub max_concurrent_subtasks: usize,
    /// 单个子任务的模型回合上限（角色配置可覆盖）
    pub max_turns_per_subtask: usize,
    /// 子任务本地重试次数（失败或验收未通过后重新排队）
    pub max_subtask_retries: u32,
    /// 分解尝试次数（含首次）；校验失败时带错误重新请求
    pub max_decompose_attempts: u32,
    pub replan_on_failure: bool,
    pub max_replans: u32,
    /// 全局模型回合预算（所有子任务共享）
    pub max_run_turns: Option<usize>,
    /// 全局墙钟预算（毫秒）
    pub run_timeout_ms: Option<u64>,
    /// 每个子任务对话保留的最大消息数
    pub max_context_messages: usize,
    pub acceptance: AcceptanceSection,
    pub follow_up: FollowUpSection,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            decomposer_role: "TaskDecomposer".to_string(),
            evaluator_role: "EvaluatorAgent".to_string(),
            max_concurrent_subtasks: 3,
            max_turns_per_subtask: 8,
            max_subtask_retries: 1,
            max_decompose_attempts: 2,
            replan_on_failure: true,
            max_replans: 1,
            max_run_turns: None,
            run_timeout_ms: None,
            max_context_messages: 40,
            acceptance: AcceptanceSection::default(),
            follow_up: FollowUpSection::default(),
        }
    }
}

/// [orchestrator.acceptance] 段：EvaluatorAgent 验收
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AcceptanceSection {
    pub enabled: bool,
    /// 需要验收的角色；为空表示除分解者与评估者外的全部角色
    pub roles: Vec<String>,
}

impl AcceptanceSection {
    pub fn applies_to(&self, role: &str) -> bool {
        self.enabled && (self.roles.is_empty() || self.roles.iter().any(|r| r == role))
    }
}

/// [orchestrator.follow_up] 段：评审未通过 / 测试失败后的修复轮次
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FollowUpSection {
    pub enabled: bool,
    pub fix_role: String,
    /// 每个原始子任务最多追加的修复轮数
    pub max_rounds: u32,
}

impl Default for FollowUpSection {
    fn default() -> Self {
        Self {
            enabled: true,
            fix_role: "CodingAgent".to_string(),
            max_rounds: 2,
        }
    }
}

/// [[agents]] 条目：角色声明（行内字段优先于 settings 文件）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentEntry {
    pub role: String,
    /// 实现标识：decomposer / coding / testing / reviewer / evaluator / default
    pub implementation: String,
    pub model: Option<String>,
    /// 角色设置文件（TOML），相对路径按配置文件所在目录之外的当前目录解析
    pub settings: Option<PathBuf>,
    pub system_prompt: Option<String>,
    pub tools: Option<Vec<String>>,
    pub max_turns: Option<usize>,
    pub params: HashMap<String, serde_json::Value>,
}

/// 角色设置文件内容
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RoleSettings {
    pub system_prompt: Option<String>,
    pub tools: Option<Vec<String>>,
    pub max_turns: Option<usize>,
    pub params: HashMap<String, serde_json::Value>,
}

impl RoleSettings {
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Configuration(format!(
                "cannot read role settings {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&text).map_err(|e| {
            OrchestratorError::Configuration(format!(
                "invalid role settings {}: {}",
                path.display(),
                e
            ))
        })
    }
}

impl AppConfig {
    /// 把 [[agents]] 条目解析为不可变的 AgentConfig 表（按角色名索引）
    /// 未声明任何 [[agents]] 时使用标准团队
    pub fn agent_configs(&self) -> Result<HashMap<String, AgentConfig>, OrchestratorError> {
        let entries = if self.agents.is_empty() {
            standard_team()
        } else {
            self.agents.clone()
        };
        let mut seen = HashSet::new();
        let mut out = HashMap::new();
        for entry in &entries {
            if entry.role.trim().is_empty() {
                return Err(OrchestratorError::Configuration(
                    "agent entry without a role".to_string(),
                ));
            }
            if !seen.insert(entry.role.clone()) {
                return Err(OrchestratorError::Configuration(format!(
                    "duplicate agent role '{}'",
                    entry.role
                )));
            }
            let settings = match &entry.settings {
                Some(path) => RoleSettings::load(path)?,
                None => RoleSettings::default(),
            };
            out.insert(entry.role.clone(), resolve_entry(entry, settings, &self.llm.model));
        }
        Ok(out)
    }
}

/// 标准团队：每种内置实现一个角色
pub fn standard_team() -> Vec<AgentEntry> {
    [
        ("TaskDecomposer", "decomposer"),
        ("CodingAgent", "coding"),
        ("TestingAgent", "testing"),
        ("ReviewerAgent", "reviewer"),
        ("EvaluatorAgent", "evaluator"),
        ("DefaultAgent", "default"),
    ]
    .into_iter()
    .map(|(role, implementation)| AgentEntry {
        role: role.to_string(),
        implementation: implementation.to_string(),
        ..Default::default()
    })
    .collect()
}

fn resolve_entry(entry: &AgentEntry, settings: RoleSettings, default_model: &str) -> AgentConfig {
    let kind = RoleKind::from_implementation(&entry.implementation);
    let system_prompt = entry
        .system_prompt
        .clone()
        .or(settings.system_prompt)
        .unwrap_or_else(|| {
            kind.map(|k| k.default_prompt().to_string())
                .unwrap_or_default()
        });
    let tools = entry
        .tools
        .clone()
        .or(settings.tools)
        .unwrap_or_else(|| {
            kind.map(|k| k.default_tools().iter().map(|t| t.to_string()).collect())
                .unwrap_or_default()
        });
    let mut params = settings.params;
    params.extend(entry.params.clone());

    AgentConfig {
        role: entry.role.clone(),
        implementation: entry.implementation.clone(),
        model: entry.model.clone().unwrap_or_else(|| default_model.to_string()),
        system_prompt,
        tools,
        max_turns: entry.max_turns.or(settings.max_turns),
        params,
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, skipped");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
