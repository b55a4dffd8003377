//! AgentRegistry：角色名 -> Agent
//!
//! 持有全部 AgentConfig、工具能力表与传输工厂。Agent 在首次 resolve 时构造并缓存；
//! 构造在缓存锁内完成，并发的首次解析只会得到同一个实例。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::agents::{Agent, AgentConfig, RoleKind};
use crate::core::OrchestratorError;
use crate::llm::TransportFactory;
use crate::tools::ToolRegistry;

pub struct AgentRegistry {
    configs: HashMap<String, AgentConfig>,
    tools: Arc<ToolRegistry>,
    factory: TransportFactory,
    cache: Mutex<HashMap<String, Arc<Agent>>>,
}

impl AgentRegistry {
    pub fn new(
        configs: HashMap<String, AgentConfig>,
        tools: Arc<ToolRegistry>,
        factory: TransportFactory,
    ) -> Self {
        Self {
            configs,
            tools,
            factory,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_configs(
        configs: impl IntoIterator<Item = AgentConfig>,
        tools: Arc<ToolRegistry>,
        factory: TransportFactory,
    ) -> Self {
        let configs = configs.into_iter().map(|c| (c.role.clone(), c)).collect();
        Self::new(configs, tools, factory)
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn config(&self, role: &str) -> Option<&AgentConfig> {
        self.configs.get(role)
    }

    /// 已配置的角色名（排序）
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.configs.keys().cloned().collect();
        roles.sort();
        roles
    }

    /// 不构造 Agent，只检查角色能否被解析
    pub fn contains(&self, role: &str) -> bool {
        self.check(role).is_ok()
    }

    /// 检查角色配置：角色存在、实现标识已知、工具均已注册
    pub fn check(&self, role: &str) -> Result<RoleKind, OrchestratorError> {
        let cfg = self.configs.get(role).ok_or_else(|| {
            OrchestratorError::Configuration(format!("unknown role '{}'", role))
        })?;
        let kind = RoleKind::from_implementation(&cfg.implementation).ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "role '{}' has unknown implementation '{}'",
                role, cfg.implementation
            ))
        })?;
        if let Some(missing) = cfg.tools.iter().find(|t| !self.tools.contains(t)) {
            return Err(OrchestratorError::Configuration(format!(
                "role '{}' binds unregistered tool '{}'",
                role, missing
            )));
        }
        Ok(kind)
    }

    pub fn resolve(&self, role: &str) -> Result<Arc<Agent>, OrchestratorError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| OrchestratorError::Configuration("agent cache poisoned".to_string()))?;
        if let Some(agent) = cache.get(role) {
            return Ok(agent.clone());
        }

        let kind = self.check(role)?;
        let cfg = self.configs[role].clone();
        let schemas = self.tools.schemas_for(&cfg.tools);
        let transport = (self.factory)(&cfg);
        let agent = Arc::new(Agent::new(cfg, kind, schemas, transport));
        tracing::info!(role = %role, kind = %kind, tools = ?agent.tool_names(), "agent constructed");
        cache.insert(role.to_string(), agent.clone());
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelTransport, ScriptedTransport};
    use crate::tools::EchoTool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(configs: Vec<AgentConfig>, built: Arc<AtomicUsize>) -> AgentRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        let factory: TransportFactory = Arc::new(move |_cfg: &AgentConfig| {
            built.fetch_add(1, Ordering::SeqCst);
            Arc::new(ScriptedTransport::texts(["ok"])) as Arc<dyn ModelTransport>
        });
        AgentRegistry::from_configs(configs, Arc::new(tools), factory)
    }

    #[test]
    fn test_resolve_errors() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut bad_impl = AgentConfig::for_kind("Wizard", RoleKind::Default);
        bad_impl.implementation = "wizardry".into();
        let bad_tool = AgentConfig::for_kind("Shell", RoleKind::Default).with_tools(&["shell"]);
        let reg = registry(vec![bad_impl, bad_tool], built.clone());

        for role in ["Nobody", "Wizard", "Shell"] {
            assert!(matches!(reg.resolve(role), Err(OrchestratorError::Configuration(_))));
            assert!(!reg.contains(role));
        }
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_first_resolution_constructs_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let cfg = AgentConfig::for_kind("DefaultAgent", RoleKind::Default).with_tools(&["echo"]);
        let reg = Arc::new(registry(vec![cfg], built.clone()));
        assert!(reg.contains("DefaultAgent"));
        assert_eq!(built.load(Ordering::SeqCst), 0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.resolve("DefaultAgent").unwrap())
            })
            .collect();
        let agents: Vec<Arc<Agent>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(agents.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(agents[0].schemas().len(), 1);
    }
}
