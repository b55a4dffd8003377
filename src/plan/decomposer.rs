//! 任务分解：目标 -> 子任务 DAG
//!
//! 解析宽松：接受 ```json 代码块、裸 JSON 数组，或第一个数组字段装着步骤的 JSON 对象。
//! 字段名兼容 id/step、assignee/role、task/title、depends_on/dependencies/prerequisites。
//! 步骤省略前置字段时依赖上一步；显式给出空数组表示没有前置。
//! 校验收集全部问题后一起返回，便于把完整错误回传给模型重新分解。

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::agents::{Agent, AgentTurn};
use crate::llm::LlmError;
use crate::memory::Message;
use crate::plan::{PlanGraph, Subtask};

/// 分解结果不合法（列出全部问题）
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", .issues.join("; "))]
pub struct ValidationError {
    pub issues: Vec<String>,
}

impl ValidationError {
    pub fn single(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

const STEP_LIST_KEYS: [&str; 4] = ["steps", "plan", "subtasks", "tasks"];
const PREREQ_KEYS: [&str; 3] = ["depends_on", "dependencies", "prerequisites"];

fn json_candidate(raw: &str) -> &str {
    let trimmed = raw.trim();
    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let rest = &trimmed[start + fence.len()..];
            if let Some(end) = rest.find("```") {
                return rest[..end].trim();
            }
        }
    }
    let bracket = trimmed.find('[').zip(trimmed.rfind(']'));
    let brace = trimmed.find('{').zip(trimmed.rfind('}'));
    match (bracket, brace) {
        (Some((s, e)), Some((bs, _))) if s < bs && s < e => &trimmed[s..=e],
        (_, Some((s, e))) if s < e => &trimmed[s..=e],
        (Some((s, e)), None) if s < e => &trimmed[s..=e],
        _ => trimmed,
    }
}

fn step_list(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut obj) => {
            for key in STEP_LIST_KEYS {
                if let Some(Value::Array(items)) = obj.remove(key) {
                    return Some(items);
                }
            }
            obj.into_iter().find_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
        }
        _ => None,
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(scalar_string))
}

/// 前置字段：None 表示步骤没写该字段
fn prerequisites(obj: &Map<String, Value>) -> Option<Vec<String>> {
    let value = PREREQ_KEYS
        .iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))?;
    Some(match value {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        other => scalar_string(other).into_iter().collect(),
    })
}

/// 把模型输出解析为子任务（不做图校验）
pub fn parse_plan(raw: &str) -> Result<Vec<Subtask>, ValidationError> {
    let candidate = json_candidate(raw);
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| ValidationError::single(format!("plan is not valid JSON: {}", e)))?;
    let steps = step_list(value)
        .ok_or_else(|| ValidationError::single("plan must be a JSON array of steps"))?;

    let mut subtasks: Vec<Subtask> = Vec::with_capacity(steps.len());
    let mut issues = Vec::new();
    for (i, step) in steps.iter().enumerate() {
        let Some(obj) = step.as_object() else {
            issues.push(format!("step #{} is not an object", i + 1));
            continue;
        };
        let id = first_string(obj, &["id", "step"]).unwrap_or_else(|| (i + 1).to_string());
        let role = first_string(obj, &["assignee", "role", "agent"]).unwrap_or_default();
        let title = first_string(obj, &["task", "title"]).unwrap_or_default();
        let description = first_string(obj, &["description", "details"])
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| title.clone());
        let prerequisites = prerequisites(obj).unwrap_or_else(|| {
            subtasks.last().map(|prev| vec![prev.id.clone()]).unwrap_or_default()
        });

        subtasks.push(
            Subtask::new(id, role, description)
                .with_title(title)
                .with_prerequisites(prerequisites),
        );
    }

    if issues.is_empty() {
        Ok(subtasks)
    } else {
        Err(ValidationError { issues })
    }
}

/// 校验子任务集合：非空、id 唯一、描述非空、角色可解析、前置存在、无自依赖、无环
pub fn validate_plan(
    subtasks: &[Subtask],
    role_exists: impl Fn(&str) -> bool,
) -> Result<(), ValidationError> {
    let mut issues = Vec::new();
    if subtasks.is_empty() {
        issues.push("plan has no steps".to_string());
    }

    let mut ids = HashSet::new();
    for s in subtasks {
        if !ids.insert(s.id.as_str()) {
            issues.push(format!("duplicate step id '{}'", s.id));
        }
    }

    for s in subtasks {
        if s.description.trim().is_empty() {
            issues.push(format!("step '{}' has an empty description", s.id));
        }
        if s.role.is_empty() {
            issues.push(format!("step '{}' has no assignee", s.id));
        } else if !role_exists(&s.role) {
            issues.push(format!("step '{}' is assigned to unknown role '{}'", s.id, s.role));
        }
        for dep in &s.prerequisites {
            if dep == &s.id {
                issues.push(format!("step '{}' depends on itself", s.id));
            } else if !ids.contains(dep.as_str()) {
                issues.push(format!("step '{}' depends on missing step '{}'", s.id, dep));
            }
        }
    }

    let graph = PlanGraph::new(subtasks.iter().map(|s| (s.id.as_str(), s.prerequisites.as_slice())));
    if let Some(cycle) = graph.find_cycle() {
        let self_only = cycle.len() == 1
            && subtasks
                .iter()
                .any(|s| s.id == cycle[0] && s.prerequisites.contains(&s.id));
        if !self_only {
            issues.push(format!("dependency cycle among steps: {}", cycle.join(", ")));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { issues })
    }
}

/// 分解者：持有分解角色的 Agent
pub struct TaskDecomposer {
    agent: Arc<Agent>,
}

impl TaskDecomposer {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }

    pub fn role(&self) -> &str {
        self.agent.role()
    }

    /// 分解请求：目标、可用角色，以及可选的反馈（上一次校验错误或失败的计划）
    pub fn request(goal: &str, roles: &[String], feedback: Option<&str>) -> String {
        let mut prompt = format!(
            "Goal: {}\n\nAvailable roles: {}\n\nReturn the plan as a JSON array of steps.",
            goal,
            roles.join(", ")
        );
        if let Some(feedback) = feedback {
            prompt.push_str("\n\n");
            prompt.push_str(feedback);
        }
        prompt
    }

    /// 调用模型拿到原始计划文本
    pub async fn draft(&self, goal: &str, roles: &[String], feedback: Option<&str>) -> Result<String, LlmError> {
        let request = Self::request(goal, roles, feedback);
        let raw = match self.agent.run_turn(&[Message::user(request)]).await? {
            AgentTurn::Final(text) | AgentTurn::Malformed(text) => text,
            AgentTurn::ToolCalls(calls) => serde_json::to_string(&calls).unwrap_or_default(),
        };
        tracing::debug!(raw = %raw, "decomposer output");
        Ok(raw)
    }

    /// 解析并校验原始计划
    pub fn finalize(raw: &str, role_exists: impl Fn(&str) -> bool) -> Result<Vec<Subtask>, ValidationError> {
        let subtasks = parse_plan(raw)?;
        validate_plan(&subtasks, role_exists)?;
        Ok(subtasks)
    }
}
