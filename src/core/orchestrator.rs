//! 编排器：主控循环
//!
//! Planning -> Dispatching -> {Dispatching, Evaluating} -> {Completed, Failed}。
//! 协调者是唯一修改计划板与依赖图的一方：它把 Ready 子任务移交给 worker（JoinSet + Semaphore 限流），
//! 收回评估完毕的子任务后再推进依赖者、插入修复轮次，或在子任务永久失败时等在途工作排空后重新规划。
//! 只有接线错误作为 Err 返回；其余失败都体现在 RunResult 中，并附完整 RunTrace。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinSet;

use crate::agents::AgentRegistry;
use crate::config::OrchestratorSection;
use crate::core::recovery::{call_with_backoff, CallError, RecoveryEngine};
use crate::core::{
    OrchestratorError, RunPhase, RunStatus, RunSupervisor, RunTrace, TaskScheduler, TraceEvent,
    TraceKind,
};
use crate::llm::RetryConfig;
use crate::plan::{Subtask, SubtaskStatus, TaskBoard, TaskDecomposer};
use crate::react::{
    build_briefing, draft_fix, follow_up_needed, AcceptanceGate, Assignment, FollowUpNeed,
    WorkerShared,
};
use crate::tools::ToolExecutor;

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub goal: String,
    pub status: RunStatus,
    /// 最终计划中的子任务（分解顺序，含修复轮次插入的子任务）
    pub subtasks: Vec<Subtask>,
    /// 被重规划替换掉的子任务
    pub retired: Vec<Subtask>,
    pub trace: Vec<TraceEvent>,
    /// 完成时按依赖顺序拼接的输出
    pub output: Option<String>,
    /// 失败时导致运行终止的错误
    pub error: Option<OrchestratorError>,
    pub replans: u32,
    pub turns_used: usize,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// 全部子任务：先是被替换的，再是最终计划
    pub fn all_subtasks(&self) -> impl Iterator<Item = &Subtask> {
        self.retired.iter().chain(self.subtasks.iter())
    }
}

/// 一轮派发的结局
enum DispatchOutcome {
    Completed,
    SubtaskFailed { id: String, role: String, reason: String },
    Aborted(String),
    Stalled,
}

/// worker 的退出方式
enum WorkerExit {
    Returned(Subtask),
    Crashed { id: String, message: String },
}

/// 单次运行的可变状态
struct RunState {
    goal: String,
    trace: Arc<RunTrace>,
    supervisor: Arc<RunSupervisor>,
    phase: RunPhase,
}

impl RunState {
    fn enter(&mut self, to: RunPhase) {
        if self.phase != to {
            if !self.phase.can_become(to) {
                tracing::warn!(from = %self.phase, to = %to, "unexpected run phase change");
            }
            tracing::debug!(from = %self.phase, to = %to, "run phase");
            self.phase = to;
        }
    }
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    executor: Arc<ToolExecutor>,
    settings: OrchestratorSection,
    retry: RetryConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        executor: Arc<ToolExecutor>,
        settings: OrchestratorSection,
        retry: RetryConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            settings,
            retry,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSection {
        &self.settings
    }

    /// 分解者可以分派的角色（不含分解者与评估者自己）
    fn assignable_roles(&self) -> Vec<String> {
        self.registry
            .roles()
            .into_iter()
            .filter(|r| r != &self.settings.decomposer_role && r != &self.settings.evaluator_role)
            .collect()
    }

    pub async fn run(&self, goal: &str) -> Result<RunResult, OrchestratorError> {
        let s = &self.settings;
        let decomposer = TaskDecomposer::new(self.registry.resolve(&s.decomposer_role)?);
        let gate = if s.acceptance.enabled {
            Some(AcceptanceGate::new(
                self.registry.resolve(&s.evaluator_role)?,
                self.retry.clone(),
            ))
        } else {
            None
        };
        let fix_drafter = if s.follow_up.enabled && self.registry.contains(&s.evaluator_role) {
            Some(self.registry.resolve(&s.evaluator_role)?)
        } else {
            None
        };

        let run_id = uuid::Uuid::new_v4().to_string();
        let supervisor = Arc::new(RunSupervisor::new(s.max_run_turns));
        let watchdog = s
            .run_timeout_ms
            .map(|ms| supervisor.spawn_watchdog(Duration::from_millis(ms)));
        let mut state = RunState {
            goal: goal.to_string(),
            trace: Arc::new(RunTrace::new()),
            supervisor: supervisor.clone(),
            phase: RunPhase::Planning,
        };
        tracing::info!(run_id = %run_id, goal = %goal, "run started");
        state.trace.record(None, TraceKind::RunStarted { goal: goal.to_string() });

        let shared = Arc::new(WorkerShared {
            goal: goal.to_string(),
            executor: self.executor.clone(),
            trace: state.trace.clone(),
            supervisor: supervisor.clone(),
            retry: self.retry.clone(),
            recovery: RecoveryEngine::new(s.max_subtask_retries),
            max_context_messages: s.max_context_messages,
            default_max_turns: s.max_turns_per_subtask,
            acceptance: s.acceptance.clone(),
            gate,
        });

        let mut retired: Vec<Subtask> = Vec::new();
        let mut replans = 0u32;
        let mut replan_context: Option<String> = None;

        let (status, board, error) = loop {
            state.enter(RunPhase::Planning);
            let plan = match self
                .plan(&decomposer, &state, replan_context.as_deref())
                .await
            {
                Ok(plan) => plan,
                Err(e) => break (RunStatus::Failed, None, Some(e)),
            };

            let mut board = TaskBoard::new(plan);
            state.enter(RunPhase::Dispatching);
            let outcome = match self
                .dispatch(&mut board, &mut state, shared.clone(), fix_drafter.as_deref())
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Some(handle) = &watchdog {
                        handle.abort();
                    }
                    return Err(e);
                }
            };

            match outcome {
                DispatchOutcome::Completed => break (RunStatus::Completed, Some(board), None),
                DispatchOutcome::Aborted(reason) => {
                    break (
                        RunStatus::Failed,
                        Some(board),
                        Some(OrchestratorError::BudgetExhausted(reason)),
                    )
                }
                DispatchOutcome::Stalled => {
                    let id = board
                        .snapshot()
                        .into_iter()
                        .find(|l| l.status != SubtaskStatus::Completed)
                        .map(|l| l.id)
                        .unwrap_or_default();
                    let error = OrchestratorError::SubtaskFailed {
                        id,
                        reason: "prerequisites can never complete".to_string(),
                    };
                    break (RunStatus::Failed, Some(board), Some(error));
                }
                DispatchOutcome::SubtaskFailed { id, role, reason } => {
                    let error = OrchestratorError::SubtaskFailed {
                        id: id.clone(),
                        reason: reason.clone(),
                    };
                    if !s.replan_on_failure || replans >= s.max_replans || supervisor.is_aborted() {
                        break (RunStatus::Failed, Some(board), Some(error));
                    }
                    replans += 1;
                    tracing::warn!(replan = replans, failed = %id, "re-planning after subtask failure");
                    state.trace.record(
                        None,
                        TraceKind::Replanned {
                            replan: replans,
                            reason: error.to_string(),
                        },
                    );
                    replan_context = Some(replan_feedback(&board, &id, &role, &reason));
                    retired.extend(board.into_subtasks());
                }
            }
        };

        if let Some(handle) = &watchdog {
            handle.abort();
        }
        state.enter(match status {
            RunStatus::Completed => RunPhase::Completed,
            RunStatus::Failed => RunPhase::Failed,
        });
        state.trace.record(None, TraceKind::RunFinished { status });
        match &error {
            Some(e) => tracing::error!(run_id = %run_id, error = %e, "run failed"),
            None => tracing::info!(run_id = %run_id, "run completed"),
        }

        let output = match (&status, &board) {
            (RunStatus::Completed, Some(board)) => Some(board.assembled_output()),
            _ => None,
        };
        Ok(RunResult {
            run_id,
            goal: goal.to_string(),
            status,
            subtasks: board.map(TaskBoard::into_subtasks).unwrap_or_default(),
            retired,
            trace: state.trace.events(),
            output,
            error,
            replans,
            turns_used: supervisor.turns_used(),
        })
    }

    /// Planning：请求分解，校验失败时带上错误再问，最多 max_decompose_attempts 次
    async fn plan(
        &self,
        decomposer: &TaskDecomposer,
        state: &RunState,
        replan_context: Option<&str>,
    ) -> Result<Vec<Subtask>, OrchestratorError> {
        let roles = self.assignable_roles();
        let attempts = self.settings.max_decompose_attempts.max(1);
        let cancel = state.supervisor.cancel_token();
        let trace = &state.trace;
        let role_exists = |role: &str| roles.iter().any(|r| r == role);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if !state.supervisor.try_spend_turn() {
                return Err(budget_error(&state.supervisor));
            }

            let feedback = match (&replan_context, &last_error) {
                (ctx, Some(e)) => Some(format!(
                    "{}Your previous plan was rejected: {}. Return a corrected plan.",
                    ctx.map(|c| format!("{}\n\n", c)).unwrap_or_default(),
                    e
                )),
                (Some(ctx), None) => Some(ctx.to_string()),
                (None, None) => None,
            };

            let raw = call_with_backoff(
                &self.retry,
                &cancel,
                |attempt, e| {
                    trace.record(
                        None,
                        TraceKind::TransportRetry {
                            attempt,
                            error: e.to_string(),
                        },
                    )
                },
                || decomposer.draft(&state.goal, &roles, feedback.as_deref()),
            )
            .await
            .map_err(|e| match e {
                CallError::Cancelled => budget_error(&state.supervisor),
                CallError::Transport(e) => OrchestratorError::Transport(e),
            })?;

            match TaskDecomposer::finalize(&raw, role_exists) {
                Ok(plan) => {
                    tracing::info!(attempt, steps = plan.len(), "plan created");
                    trace.record(
                        None,
                        TraceKind::PlanCreated {
                            attempt,
                            subtasks: plan.iter().map(|s| s.id.clone()).collect(),
                        },
                    );
                    return Ok(plan);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "plan rejected");
                    trace.record(
                        None,
                        TraceKind::PlanRejected {
                            attempt,
                            error: e.to_string(),
                        },
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .map(OrchestratorError::Validation)
            .unwrap_or_else(|| OrchestratorError::Configuration("no decomposition attempt made".to_string())))
    }

    /// Dispatching / Evaluating：派发 Ready 子任务、收回结果，直到计划完成、失败或运行中止
    async fn dispatch(
        &self,
        board: &mut TaskBoard,
        state: &mut RunState,
        shared: Arc<WorkerShared>,
        fix_drafter: Option<&crate::agents::Agent>,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let scheduler = TaskScheduler::new(self.settings.max_concurrent_subtasks);
        let mut workers: JoinSet<WorkerExit> = JoinSet::new();
        let mut failure: Option<(String, String, String)> = None;
        let mut config_error: Option<OrchestratorError> = None;

        loop {
            let draining = failure.is_some() || config_error.is_some() || state.supervisor.is_aborted();
            if !draining {
                for id in board.promote_ready() {
                    state.trace.transition(&id, SubtaskStatus::Pending, SubtaskStatus::Ready, None);
                }
                while let Some(permit) = scheduler.try_acquire() {
                    let Some(subtask) = board.take_ready() else {
                        break;
                    };
                    let agent = match self.registry.resolve(&subtask.role) {
                        Ok(agent) => agent,
                        Err(e) => {
                            board.put_back(subtask);
                            config_error = Some(e);
                            state.supervisor.abort("configuration error");
                            break;
                        }
                    };
                    let briefing = build_briefing(&state.goal, &board.snapshot(), &subtask);
                    tracing::info!(subtask = %subtask.id, role = %subtask.role, "dispatching subtask");

                    let shared = shared.clone();
                    let id = subtask.id.clone();
                    workers.spawn(async move {
                        let _permit = permit;
                        let assignment = Assignment {
                            subtask,
                            agent,
                            briefing,
                        };
                        match AssertUnwindSafe(shared.run(assignment)).catch_unwind().await {
                            Ok(subtask) => WorkerExit::Returned(subtask),
                            Err(payload) => WorkerExit::Crashed {
                                id,
                                message: panic_text(payload),
                            },
                        }
                    });
                }
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            state.enter(RunPhase::Evaluating);
            let exit = match joined {
                Ok(exit) => exit,
                Err(e) => {
                    tracing::error!(error = %e, "worker task could not be joined");
                    continue;
                }
            };

            match exit {
                WorkerExit::Crashed { id, message } => {
                    let reason = format!("worker crashed: {}", message);
                    tracing::error!(subtask = %id, reason = %reason, "worker crashed");
                    if let Some(s) = board.mark_lost(&id, reason.clone()) {
                        state
                            .trace
                            .transition(&id, SubtaskStatus::Running, SubtaskStatus::Failed, Some(reason.clone()));
                        if failure.is_none() {
                            failure = Some((id, s.role.clone(), reason));
                        }
                    }
                }
                WorkerExit::Returned(subtask) => {
                    let id = subtask.id.clone();
                    let status = subtask.status;
                    let role = subtask.role.clone();
                    let reason = subtask.error.clone().unwrap_or_default();
                    let snapshot = (status == SubtaskStatus::Completed).then(|| subtask.clone());
                    board.put_back(subtask);

                    match status {
                        SubtaskStatus::Completed => {
                            let accepting = failure.is_none() && !state.supervisor.is_aborted();
                            if let (true, Some(done)) = (accepting, snapshot) {
                                self.follow_up(board, state, &done, fix_drafter).await;
                            }
                        }
                        SubtaskStatus::Failed if !state.supervisor.is_aborted() && failure.is_none() => {
                            failure = Some((id, role, reason));
                        }
                        _ => {}
                    }
                }
            }
            state.enter(RunPhase::Dispatching);
        }

        if let Some(e) = config_error {
            return Err(e);
        }
        if let Some(reason) = state.supervisor.abort_reason() {
            return Ok(DispatchOutcome::Aborted(reason));
        }
        if let Some((id, role, reason)) = failure {
            return Ok(DispatchOutcome::SubtaskFailed { id, role, reason });
        }
        if board.all_completed() {
            Ok(DispatchOutcome::Completed)
        } else {
            Ok(DispatchOutcome::Stalled)
        }
    }

    /// 评审未通过或测试失败时插入一轮修复：fix（修复角色）-> recheck（原角色再做一次）
    async fn follow_up(
        &self,
        board: &mut TaskBoard,
        state: &RunState,
        flagged: &Subtask,
        fix_drafter: Option<&crate::agents::Agent>,
    ) {
        let cfg = &self.settings.follow_up;
        if !cfg.enabled {
            return;
        }
        let Ok(kind) = self.registry.check(&flagged.role) else {
            return;
        };
        let result = flagged.result.as_deref().unwrap_or_default();
        let Some(need) = follow_up_needed(kind, result) else {
            return;
        };
        if flagged.round >= cfg.max_rounds {
            tracing::warn!(subtask = %flagged.id, rounds = flagged.round, "follow-up rounds exhausted, accepting result");
            return;
        }
        if !self.registry.contains(&cfg.fix_role) {
            tracing::warn!(fix_role = %cfg.fix_role, "fix role not available, skipping follow-up");
            return;
        }

        let description = match need {
            FollowUpNeed::ReviewChanges(notes) => format!(
                "Address the review feedback on step [{}] {}:\n{}",
                flagged.id, flagged.title, notes
            ),
            FollowUpNeed::TestFailure(report) => {
                let drafted = match fix_drafter {
                    Some(agent) if state.supervisor.try_spend_turn() => {
                        draft_fix(
                            agent,
                            &self.retry,
                            &state.supervisor.cancel_token(),
                            &state.goal,
                            flagged,
                            &report,
                        )
                        .await
                    }
                    _ => None,
                };
                drafted.unwrap_or_else(|| {
                    format!(
                        "Fix the code so that the failing tests from step [{}] pass. Test report:\n{}",
                        flagged.id, report
                    )
                })
            }
        };

        let origin = flagged.origin_id().to_string();
        let round = flagged.round + 1;
        let mut fix = Subtask::new(board.unique_id(&format!("{}-fix", origin)), cfg.fix_role.clone(), description)
            .with_title(format!("Fix issues found in [{}]", flagged.id))
            .with_prerequisites([flagged.id.clone()]);
        fix.origin = Some(origin.clone());
        fix.round = round;

        let mut recheck = Subtask::new(
            board.unique_id(&format!("{}-recheck", origin)),
            flagged.role.clone(),
            flagged.description.clone(),
        )
        .with_title(flagged.title.clone())
        .with_prerequisites([fix.id.clone()]);
        recheck.origin = Some(origin);
        recheck.round = round;

        tracing::info!(flagged = %flagged.id, fix = %fix.id, recheck = %recheck.id, round, "follow-up round inserted");
        state.trace.record(
            Some(&flagged.id),
            TraceKind::FollowUp {
                fix: fix.id.clone(),
                recheck: recheck.id.clone(),
                round,
            },
        );
        board.insert_follow_up(&flagged.id, fix, recheck);
    }
}

fn budget_error(supervisor: &RunSupervisor) -> OrchestratorError {
    OrchestratorError::BudgetExhausted(
        supervisor
            .abort_reason()
            .unwrap_or_else(|| "run aborted".to_string()),
    )
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 重规划时交给分解者的上下文：失败点与已完成步骤的结果
fn replan_feedback(board: &TaskBoard, failed_id: &str, role: &str, reason: &str) -> String {
    let mut out = format!(
        "A previous plan failed at step [{}] (assigned to {}): {}\n",
        failed_id, role, reason
    );
    let done: Vec<String> = board
        .snapshot()
        .into_iter()
        .filter(|l| l.status == SubtaskStatus::Completed)
        .map(|l| format!("- [{}] {}: {}", l.id, l.title, l.result.unwrap_or_default()))
        .collect();
    if !done.is_empty() {
        out.push_str("Steps already completed:\n");
        out.push_str(&done.join("\n"));
        out.push('\n');
    }
    out.push_str("Plan only the remaining work, avoiding the approach that failed.");
    out
}
