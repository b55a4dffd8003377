//! 子任务 worker：回合循环与评估
//!
//! worker 接手一个 Ready 子任务，独占它直到评估结束：
//! Ready -> Running -> 回合循环（run_turn -> 工具调用 -> 观察 -> 下一回合）-> 可选验收
//! -> Completed / Pending（带反馈重新排队）/ Failed，然后把子任务交还协调者。
//! 回合循环遵守单子任务回合上限与全局预算；传输失败按退避策略重试。

use std::sync::Arc;

use crate::agents::{Agent, AgentTurn};
use crate::config::AcceptanceSection;
use crate::core::recovery::{call_with_backoff, CallError, Failure, RecoveryAction, RecoveryEngine};
use crate::core::{RunSupervisor, RunTrace, TraceKind};
use crate::llm::RetryConfig;
use crate::memory::{Conversation, Message};
use crate::plan::{Subtask, SubtaskStatus};
use crate::react::{AcceptanceGate, Verdict};
use crate::tools::ToolExecutor;

const CORRECTION_PROMPT: &str = "Your previous reply looked like a tool call but was not valid JSON. \
To call a tool, reply with a single JSON object only, for example \
{\"tool\": \"read_file\", \"args\": {\"path\": \"src/lib.rs\"}}. \
To finish the task, reply with the final result as plain text.";

/// Observation 写入上下文的最大字符数
const OBSERVATION_CHARS: usize = 8_000;

/// 所有 worker 共享的运行期依赖
pub struct WorkerShared {
    pub goal: String,
    pub executor: Arc<ToolExecutor>,
    pub trace: Arc<RunTrace>,
    pub supervisor: Arc<RunSupervisor>,
    pub retry: RetryConfig,
    pub recovery: RecoveryEngine,
    pub max_context_messages: usize,
    pub default_max_turns: usize,
    pub acceptance: AcceptanceSection,
    pub gate: Option<AcceptanceGate>,
}

/// 一次派发：子任务、负责的 Agent 与简报
pub struct Assignment {
    pub subtask: Subtask,
    pub agent: Arc<Agent>,
    pub briefing: String,
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}\n... (truncated)", s.chars().take(max).collect::<String>())
    }
}

impl WorkerShared {
    fn transition(&self, subtask: &mut Subtask, to: SubtaskStatus, detail: Option<String>) {
        let from = subtask.status;
        match subtask.transition(to) {
            Ok(()) => {
                tracing::info!(subtask = %subtask.id, from = %from, to = %to, "subtask transition");
                self.trace.transition(&subtask.id, from, to, detail);
            }
            Err(e) => tracing::error!(error = %e, "rejected subtask transition"),
        }
    }

    /// 驱动一个子任务直到评估结束，返回交还给协调者的子任务
    pub async fn run(self: Arc<Self>, assignment: Assignment) -> Subtask {
        let Assignment {
            mut subtask,
            agent,
            briefing,
        } = assignment;

        let detail = format!("attempt {}", subtask.attempts + 1);
        self.transition(&mut subtask, SubtaskStatus::Running, Some(detail));

        let outcome = match self.drive(&agent, &mut subtask, briefing).await {
            Ok(result) => self.evaluate(&mut subtask, result).await,
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(result) => {
                let from = subtask.status;
                match subtask.complete(result) {
                    Ok(true) => {
                        tracing::info!(subtask = %subtask.id, "subtask completed");
                        self.trace.transition(&subtask.id, from, SubtaskStatus::Completed, None);
                    }
                    Ok(false) => {}
                    Err(e) => tracing::error!(error = %e, "cannot complete subtask"),
                }
            }
            Err(failure) => self.recover(&mut subtask, failure),
        }
        subtask
    }

    fn recover(&self, subtask: &mut Subtask, failure: Failure) {
        if let Failure::BudgetExhausted(reason) = &failure {
            self.trace.record(
                Some(&subtask.id),
                TraceKind::BudgetExhausted {
                    reason: reason.clone(),
                },
            );
        }
        match self.recovery.handle(subtask, &failure) {
            RecoveryAction::Requeue(feedback) => {
                tracing::warn!(subtask = %subtask.id, reason = %failure.describe(), "subtask requeued");
                let from = subtask.status;
                match subtask.requeue(feedback) {
                    Ok(()) => self.trace.transition(
                        &subtask.id,
                        from,
                        SubtaskStatus::Pending,
                        Some(failure.describe()),
                    ),
                    Err(e) => tracing::error!(error = %e, "cannot requeue subtask"),
                }
            }
            RecoveryAction::Fail(reason) => {
                tracing::error!(subtask = %subtask.id, reason = %reason, "subtask failed");
                let from = subtask.status;
                match subtask.fail(reason.clone()) {
                    Ok(()) => self.trace.transition(&subtask.id, from, SubtaskStatus::Failed, Some(reason)),
                    Err(e) => tracing::error!(error = %e, "cannot fail subtask"),
                }
            }
        }
    }

    fn budget_failure(&self) -> Failure {
        Failure::BudgetExhausted(
            self.supervisor
                .abort_reason()
                .unwrap_or_else(|| "run aborted".to_string()),
        )
    }

    /// 回合循环：得到最终文本，或返回失败原因
    async fn drive(&self, agent: &Agent, subtask: &mut Subtask, briefing: String) -> Result<String, Failure> {
        let cancel = self.supervisor.cancel_token();
        let max_turns = agent.config().max_turns.unwrap_or(self.default_max_turns).max(1);
        let mut conversation = Conversation::new(briefing, self.max_context_messages);
        let id = subtask.id.clone();
        let trace = &self.trace;

        for turn in 1..=max_turns {
            if !self.supervisor.try_spend_turn() {
                return Err(self.budget_failure());
            }
            subtask.turns_used += 1;

            let reply = call_with_backoff(
                &self.retry,
                &cancel,
                |attempt, e| {
                    trace.record(
                        Some(&id),
                        TraceKind::TransportRetry {
                            attempt,
                            error: e.to_string(),
                        },
                    )
                },
                || agent.run_turn(conversation.messages()),
            )
            .await;

            let reply = match reply {
                Ok(reply) => reply,
                Err(CallError::Cancelled) => return Err(self.budget_failure()),
                Err(CallError::Transport(e)) => return Err(Failure::Transport(e)),
            };

            match reply {
                AgentTurn::Final(text) => {
                    trace.record(Some(&id), TraceKind::ModelTurn { turn, outcome: "final".into() });
                    return Ok(text);
                }
                AgentTurn::Malformed(raw) => {
                    trace.record(Some(&id), TraceKind::ModelTurn { turn, outcome: "malformed".into() });
                    tracing::warn!(subtask = %id, "malformed tool call, sending correction prompt");
                    conversation.push(Message::assistant(raw));
                    conversation.push(Message::user(CORRECTION_PROMPT));
                }
                AgentTurn::ToolCalls(calls) => {
                    trace.record(
                        Some(&id),
                        TraceKind::ModelTurn {
                            turn,
                            outcome: format!("tool_calls({})", calls.len()),
                        },
                    );
                    conversation.push(Message::assistant(serde_json::to_string(&calls).unwrap_or_default()));
                    for request in &calls {
                        let call = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(self.budget_failure()),
                            call = self.executor.invoke(agent.role(), agent.tool_names(), request) => call,
                        };
                        let observation = if call.is_error {
                            format!("Tool '{}' returned an error:\n{}", call.tool, call.output)
                        } else {
                            format!("Observation from '{}':\n{}", call.tool, clip(&call.output, OBSERVATION_CHARS))
                        };
                        trace.record(Some(&id), TraceKind::ToolCall { call });
                        conversation.push(Message::user(observation));
                    }
                }
            }
        }
        Err(Failure::TurnBudget(max_turns))
    }

    /// 验收关：配置启用且适用于该角色时，由评估者决定结果是否计为完成
    async fn evaluate(&self, subtask: &mut Subtask, result: String) -> Result<String, Failure> {
        let Some(gate) = &self.gate else {
            return Ok(result);
        };
        if !self.acceptance.applies_to(&subtask.role) || subtask.role == gate.role() {
            return Ok(result);
        }
        if !self.supervisor.try_spend_turn() {
            return Err(self.budget_failure());
        }

        let cancel = self.supervisor.cancel_token();
        match gate.review(&self.goal, subtask, &result, &cancel).await {
            Ok(Verdict::Accept) => {
                self.trace.record(
                    Some(&subtask.id),
                    TraceKind::Verdict {
                        accepted: true,
                        feedback: String::new(),
                    },
                );
                Ok(result)
            }
            Ok(Verdict::Reject(feedback)) => {
                self.trace.record(
                    Some(&subtask.id),
                    TraceKind::Verdict {
                        accepted: false,
                        feedback: feedback.clone(),
                    },
                );
                Err(Failure::Rejected(feedback))
            }
            Err(CallError::Cancelled) => Err(self.budget_failure()),
            Err(CallError::Transport(e)) => Err(Failure::Transport(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentConfig, RoleKind};
    use crate::llm::{LlmError, ModelReply, ScriptedTransport};
    use crate::tools::{EchoTool, ToolRegistry, ToolRequest};
    use serde_json::json;

    fn shared(max_retries: u32) -> Arc<WorkerShared> {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        Arc::new(WorkerShared {
            goal: "goal".into(),
            executor: Arc::new(ToolExecutor::new(Arc::new(reg), 5)),
            trace: Arc::new(RunTrace::new()),
            supervisor: Arc::new(RunSupervisor::new(None)),
            retry: RetryConfig {
                max_retries: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            recovery: RecoveryEngine::new(max_retries),
            max_context_messages: 40,
            default_max_turns: 3,
            acceptance: AcceptanceSection::default(),
            gate: None,
        })
    }

    fn agent(replies: Vec<Result<ModelReply, LlmError>>) -> (Arc<Agent>, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(replies));
        let cfg = AgentConfig::for_kind("DefaultAgent", RoleKind::Default).with_tools(&["echo"]);
        (
            Arc::new(Agent::new(cfg, RoleKind::Default, Vec::new(), transport.clone())),
            transport,
        )
    }

    fn ready(id: &str) -> Subtask {
        let mut s = Subtask::new(id, "DefaultAgent", "say hi");
        s.transition(SubtaskStatus::Ready).unwrap();
        s
    }

    #[tokio::test]
    async fn test_tool_loop_then_final() {
        let sh = shared(0);
        let (agent, transport) = agent(vec![
            Ok(ModelReply::ToolCalls(vec![ToolRequest::new("echo", json!({"text": "hi"}))])),
            Ok(ModelReply::Text("said hi".into())),
        ]);
        let s = sh
            .clone()
            .run(Assignment {
                subtask: ready("S1"),
                agent,
                briefing: "brief".into(),
            })
            .await;
        assert_eq!(s.status, SubtaskStatus::Completed);
        assert_eq!(s.result.as_deref(), Some("said hi"));
        assert_eq!(s.turns_used, 2);

        let seen = transport.seen();
        let second_turn = &seen[1];
        assert_eq!(second_turn.last().unwrap().content, "Observation from 'echo':\nhi");
        assert_eq!(
            sh.trace.statuses_of("S1"),
            vec![SubtaskStatus::Pending, SubtaskStatus::Running, SubtaskStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_malformed_gets_correction_and_costs_a_turn() {
        let sh = shared(0);
        let (agent, transport) = agent(vec![
            Ok(ModelReply::Malformed("{\"tool\": \"echo\"".into())),
            Ok(ModelReply::Text("ok".into())),
        ]);
        let s = sh
            .clone()
            .run(Assignment {
                subtask: ready("S1"),
                agent,
                briefing: "brief".into(),
            })
            .await;
        assert_eq!(s.status, SubtaskStatus::Completed);
        assert_eq!(s.turns_used, 2);
        assert!(transport.seen()[1].last().unwrap().content.contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_turn_budget_requeues_then_fails() {
        let sh = shared(1);
        let looping = ModelReply::ToolCalls(vec![ToolRequest::new("echo", json!({"text": "again"}))]);
        let transport = Arc::new(ScriptedTransport::new(Vec::new()).with_fallback(looping));
        let cfg = AgentConfig::for_kind("DefaultAgent", RoleKind::Default).with_tools(&["echo"]);
        let agent = Arc::new(Agent::new(cfg, RoleKind::Default, Vec::new(), transport));

        let s = sh
            .clone()
            .run(Assignment {
                subtask: ready("S1"),
                agent: agent.clone(),
                briefing: "brief".into(),
            })
            .await;
        assert_eq!(s.status, SubtaskStatus::Pending);
        assert_eq!(s.feedback.len(), 1);

        let mut s = s;
        s.transition(SubtaskStatus::Ready).unwrap();
        let s = sh
            .clone()
            .run(Assignment {
                subtask: s,
                agent,
                briefing: "brief".into(),
            })
            .await;
        assert_eq!(s.status, SubtaskStatus::Failed);
        assert!(s.error.unwrap().contains("turn budget of 3 turns exhausted"));
    }

    #[tokio::test]
    async fn test_transport_retried_then_failed() {
        let sh = shared(0);
        let (agent, transport) = agent(vec![Err(LlmError::Timeout), Err(LlmError::Timeout)]);
        let s = sh
            .clone()
            .run(Assignment {
                subtask: ready("S1"),
                agent,
                briefing: "brief".into(),
            })
            .await;
        assert_eq!(s.status, SubtaskStatus::Failed);
        assert!(s.error.unwrap().contains("transport error"));
        assert_eq!(transport.calls(), 2);
        assert!(sh
            .trace
            .for_subtask("S1")
            .iter()
            .any(|e| matches!(e.kind, TraceKind::TransportRetry { attempt: 1, .. })));
    }
}
