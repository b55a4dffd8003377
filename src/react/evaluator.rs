//! 结果评估：验收关与修复轮次判断
//!
//! - AcceptanceGate：让 EvaluatorAgent 对子任务结果给出 ACCEPT / REJECT 结论
//! - follow_up_needed：评审结果不含 LGTM、测试结果含 FAIL 时需要插入修复轮次
//! - draft_fix：测试失败时请 EvaluatorAgent 起草修复任务描述

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::agents::{Agent, AgentTurn, RoleKind};
use crate::core::recovery::{call_with_backoff, CallError};
use crate::llm::RetryConfig;
use crate::memory::Message;
use crate::plan::Subtask;

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(String),
}

static VERDICT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TEST_FAILURE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn verdict_re() -> Option<&'static Regex> {
    VERDICT_RE
        .get_or_init(|| Regex::new(r"(?i)^\s*\**\s*(ACCEPT(?:ED)?|REJECT(?:ED)?)\b\**[\s:.\-]*").ok())
        .as_ref()
}

fn test_failure_re() -> Option<&'static Regex> {
    TEST_FAILURE_RE
        .get_or_init(|| Regex::new(r"\bFAIL").ok())
        .as_ref()
}

/// 解析评估结论：以 ACCEPT / REJECT 开头为准；否则含 LGTM 视为通过，其余视为带反馈的拒绝
pub fn parse_verdict(text: &str) -> Verdict {
    let trimmed = text.trim();
    if let Some(caps) = verdict_re().and_then(|re| re.captures(trimmed)) {
        let word = caps.get(1).map(|m| m.as_str().to_uppercase()).unwrap_or_default();
        let rest = caps
            .get(0)
            .map(|m| trimmed[m.end()..].trim())
            .unwrap_or_default();
        return if word.starts_with("ACCEPT") {
            Verdict::Accept
        } else if rest.is_empty() {
            Verdict::Reject("The evaluator rejected the result without details.".to_string())
        } else {
            Verdict::Reject(rest.to_string())
        };
    }
    if trimmed.to_uppercase().contains("LGTM") {
        Verdict::Accept
    } else {
        Verdict::Reject(trimmed.to_string())
    }
}

/// 修复轮次的触发原因
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUpNeed {
    /// 评审提出修改意见
    ReviewChanges(String),
    /// 测试报告失败
    TestFailure(String),
}

pub fn follow_up_needed(kind: RoleKind, result: &str) -> Option<FollowUpNeed> {
    match kind {
        RoleKind::Reviewer if !result.to_uppercase().contains("LGTM") => {
            Some(FollowUpNeed::ReviewChanges(result.to_string()))
        }
        RoleKind::Testing if test_failure_re().map(|re| re.is_match(result)).unwrap_or(false) => {
            Some(FollowUpNeed::TestFailure(result.to_string()))
        }
        _ => None,
    }
}

/// 验收关：持有 EvaluatorAgent
pub struct AcceptanceGate {
    agent: Arc<Agent>,
    retry: RetryConfig,
}

impl AcceptanceGate {
    pub fn new(agent: Arc<Agent>, retry: RetryConfig) -> Self {
        Self { agent, retry }
    }

    pub fn role(&self) -> &str {
        self.agent.role()
    }

    pub async fn review(
        &self,
        goal: &str,
        subtask: &Subtask,
        result: &str,
        cancel: &CancellationToken,
    ) -> Result<Verdict, CallError> {
        let request = format!(
            "Goal: {}\n\nTask [{}] {} (assigned to {}):\n{}\n\nResult:\n{}\n\n\
             Does the result complete the task? Reply ACCEPT, or REJECT followed by what must change.",
            goal, subtask.id, subtask.title, subtask.role, subtask.description, result
        );
        let text = ask(&self.agent, &self.retry, cancel, request).await?;
        Ok(parse_verdict(&text))
    }
}

async fn ask(
    agent: &Agent,
    retry: &RetryConfig,
    cancel: &CancellationToken,
    request: String,
) -> Result<String, CallError> {
    let context = [Message::user(request)];
    let turn = call_with_backoff(retry, cancel, |_, _| {}, || agent.run_turn(&context)).await?;
    Ok(match turn {
        AgentTurn::Final(text) | AgentTurn::Malformed(text) => text,
        AgentTurn::ToolCalls(calls) => serde_json::to_string(&calls).unwrap_or_default(),
    })
}

/// 请评估者把测试失败整理成给修复角色的任务描述；失败时返回 None，由调用方用默认描述
pub async fn draft_fix(
    agent: &Agent,
    retry: &RetryConfig,
    cancel: &CancellationToken,
    goal: &str,
    flagged: &Subtask,
    report: &str,
) -> Option<String> {
    let request = format!(
        "Goal: {}\n\nThe step [{}] {} reported test failures:\n{}\n\n\
         Write a short, concrete task description telling a coding agent what to fix. Reply with the description only.",
        goal, flagged.id, flagged.title, report
    );
    match ask(agent, retry, cancel, request).await {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = ?e, "could not draft fix description");
            None
        }
    }
}
