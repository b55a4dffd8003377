//! 编排集成测试：用按角色脚本化的传输层驱动完整运行

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use hive::agents::AgentConfig;
    use hive::config::AppConfig;
    use hive::core::{OrchestratorBuilder, OrchestratorError, RunStatus, TraceEvent, TraceKind};
    use hive::llm::{LlmError, ModelReply, ModelTransport, ScriptedTransport, TransportFactory};
    use hive::memory::Message;
    use hive::plan::SubtaskStatus;
    use hive::tools::{ToolRequest, ToolSchema};
    use serde_json::json;
    use tempfile::TempDir;

    /// 每个角色一个脚本；未提供脚本的角色回复 "done"
    struct Team {
        scripts: HashMap<String, Arc<ScriptedTransport>>,
    }

    impl Team {
        fn new() -> Self {
            Self {
                scripts: HashMap::new(),
            }
        }

        fn role(mut self, role: &str, transport: ScriptedTransport) -> Self {
            self.scripts.insert(role.to_string(), Arc::new(transport));
            self
        }

        fn get(&self, role: &str) -> Arc<ScriptedTransport> {
            self.scripts[role].clone()
        }

        fn factory(&self) -> TransportFactory {
            let scripts = self.scripts.clone();
            Arc::new(move |cfg: &AgentConfig| -> Arc<dyn ModelTransport> {
                match scripts.get(&cfg.role) {
                    Some(t) => t.clone() as Arc<dyn ModelTransport>,
                    None => Arc::new(ScriptedTransport::new(Vec::new())),
                }
            })
        }
    }

    fn fast_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.retry.max_retries = 1;
        cfg.llm.retry.base_delay_ms = 1;
        cfg.llm.retry.max_delay_ms = 2;
        cfg
    }

    fn plan(steps: serde_json::Value) -> String {
        format!("```json\n{}\n```", json!({ "steps": steps }))
    }

    fn index_of(trace: &[TraceEvent], id: &str, to: SubtaskStatus) -> usize {
        trace
            .iter()
            .position(|e| {
                e.subtask.as_deref() == Some(id)
                    && matches!(&e.kind, TraceKind::Transition { to: t, .. } if *t == to)
            })
            .unwrap_or_else(|| panic!("no transition of {} to {}", id, to))
    }

    async fn run(cfg: AppConfig, team: &Team, goal: &str) -> (hive::RunResult, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let orch = OrchestratorBuilder::new(cfg, dir.path())
            .with_transport_factory(team.factory())
            .build()
            .unwrap();
        let result = orch.run(goal).await.unwrap();
        (result, dir)
    }

    #[tokio::test]
    async fn test_code_test_review_runs_in_dependency_order() {
        let team = Team::new()
            .role(
                "TaskDecomposer",
                ScriptedTransport::texts([plan(json!([
                    {"id": "S1", "assignee": "CodingAgent", "task": "Patch", "description": "add input validation", "depends_on": []},
                    {"id": "S2", "assignee": "TestingAgent", "task": "Test", "description": "write tests for the validation", "depends_on": ["S1"]},
                    {"id": "S3", "assignee": "ReviewerAgent", "task": "Review", "description": "review the change", "depends_on": ["S1", "S2"]}
                ]))]),
            )
            .role(
                "CodingAgent",
                ScriptedTransport::new(vec![
                    Ok(ModelReply::ToolCalls(vec![ToolRequest::new(
                        "edit_file",
                        json!({"path": "src/validate.rs", "content": "pub fn check() {}"}),
                    )])),
                    Ok(ModelReply::Text("patched src/validate.rs".into())),
                ]),
            )
            .role("TestingAgent", ScriptedTransport::texts(["all 4 tests passed"]))
            .role("ReviewerAgent", ScriptedTransport::texts(["LGTM"]));

        let (result, dir) = run(fast_config(), &team, "add input validation with tests").await;

        assert_eq!(result.status, RunStatus::Completed, "error: {:?}", result.error);
        assert!(result.subtasks.iter().all(|s| s.status == SubtaskStatus::Completed));
        assert!(dir.path().join("src/validate.rs").exists());

        let t = &result.trace;
        assert!(index_of(t, "S1", SubtaskStatus::Completed) < index_of(t, "S2", SubtaskStatus::Running));
        assert!(index_of(t, "S2", SubtaskStatus::Completed) < index_of(t, "S3", SubtaskStatus::Running));
        assert!(matches!(t.last().map(|e| &e.kind), Some(TraceKind::RunFinished { status: RunStatus::Completed })));

        let output = result.output.unwrap();
        let s1 = output.find("[S1]").unwrap();
        let s3 = output.find("[S3]").unwrap();
        assert!(s1 < s3);
        assert!(output.contains("patched src/validate.rs"));

        // 测试者的简报里能看到编码结果
        let seen = team.get("TestingAgent").seen();
        assert!(seen[0].iter().any(|m| m.content.contains("patched src/validate.rs")));
    }

    #[tokio::test]
    async fn test_missing_tool_argument_is_observed_not_fatal() {
        let team = Team::new()
            .role(
                "TaskDecomposer",
                ScriptedTransport::texts([plan(json!([
                    {"id": "S1", "assignee": "CodingAgent", "description": "inspect the readme"}
                ]))]),
            )
            .role(
                "CodingAgent",
                ScriptedTransport::new(vec![
                    Ok(ModelReply::ToolCalls(vec![ToolRequest::new("read_file", json!({}))])),
                    Ok(ModelReply::Text("nothing to read".into())),
                ]),
            );

        let (result, _dir) = run(fast_config(), &team, "inspect").await;

        assert_eq!(result.status, RunStatus::Completed);
        let call = result
            .trace
            .iter()
            .find_map(|e| match &e.kind {
                TraceKind::ToolCall { call } => Some(call.clone()),
                _ => None,
            })
            .unwrap();
        assert!(call.is_error);
        assert!(call.output.contains("path"));

        let seen = team.get("CodingAgent").seen();
        assert!(seen[1].last().unwrap().content.starts_with("Tool 'read_file' returned an error"));
    }

    #[tokio::test]
    async fn test_wall_clock_budget_fails_running_subtasks() {
        let mut cfg = fast_config();
        cfg.orchestrator.run_timeout_ms = Some(150);
        let team = Team::new()
            .role(
                "TaskDecomposer",
                ScriptedTransport::texts([plan(json!([
                    {"id": "A", "assignee": "CodingAgent", "description": "slow work", "depends_on": []},
                    {"id": "B", "assignee": "DefaultAgent", "description": "more slow work", "depends_on": []}
                ]))]),
            )
            .role(
                "CodingAgent",
                ScriptedTransport::new(Vec::new()).with_delay(Duration::from_secs(30)),
            )
            .role(
                "DefaultAgent",
                ScriptedTransport::new(Vec::new()).with_delay(Duration::from_secs(30)),
            );

        let started = std::time::Instant::now();
        let (result, _dir) = run(cfg, &team, "slow goal").await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(result.status, RunStatus::Failed);
        assert!(matches!(result.error, Some(OrchestratorError::BudgetExhausted(_))));
        for id in ["A", "B"] {
            let s = result.subtask(id).unwrap();
            assert_eq!(s.status, SubtaskStatus::Failed);
            assert!(s.error.as_deref().unwrap().contains("budget exhausted"));
        }
        assert!(result
            .trace
            .iter()
            .any(|e| matches!(e.kind, TraceKind::BudgetExhausted { .. })));
    }

    #[tokio::test]
    async fn test_turn_budget_aborts_run() {
        let mut cfg = fast_config();
        cfg.orchestrator.max_run_turns = Some(3);
        let looping = ModelReply::ToolCalls(vec![ToolRequest::new("list_files", json!({}))]);
        let team = Team::new()
            .role(
                "TaskDecomposer",
                ScriptedTransport::texts([plan(json!([
                    {"id": "S1", "assignee": "CodingAgent", "description": "explore forever"}
                ]))]),
            )
            .role("CodingAgent", ScriptedTransport::new(Vec::new()).with_fallback(looping));

        let (result, _dir) = run(cfg, &team, "explore").await;

        assert_eq!(result.status, RunStatus::Failed);
        match &result.error {
            Some(OrchestratorError::BudgetExhausted(reason)) => assert!(reason.contains("turn budget")),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(team.get("CodingAgent").calls(), 2);
        assert_eq!(result.subtask("S1").unwrap().status, SubtaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_invalid_plans_are_reasked_then_fail() {
        let team = Team::new().role(
            "TaskDecomposer",
            ScriptedTransport::texts([
                plan(json!([
                    {"id": "A", "assignee": "CodingAgent", "description": "a", "depends_on": ["B"]},
                    {"id": "B", "assignee": "CodingAgent", "description": "b", "depends_on": ["A"]}
                ])),
                plan(json!([
                    {"id": "A", "assignee": "WizardAgent", "description": "cast a spell", "depends_on": []}
                ])),
            ]),
        );

        let (result, _dir) = run(fast_config(), &team, "do magic").await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.subtasks.is_empty());
        match &result.error {
            Some(OrchestratorError::Validation(e)) => assert!(e.to_string().contains("WizardAgent")),
            other => panic!("unexpected error {:?}", other),
        }
        let decomposer = team.get("TaskDecomposer");
        assert_eq!(decomposer.calls(), 2);
        let seen = decomposer.seen();
        assert!(seen[1].iter().any(|m| m.content.contains("dependency cycle")));
        let rejected = result
            .trace
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::PlanRejected { .. }))
            .count();
        assert_eq!(rejected, 2);
    }

    #[tokio::test]
    async fn test_missing_decomposer_role_is_configuration_error() {
        let mut cfg = fast_config();
        cfg.orchestrator.decomposer_role = "Planner9000".into();
        let dir = tempfile::tempdir().unwrap();
        let orch = OrchestratorBuilder::new(cfg, dir.path())
            .with_transport_factory(Team::new().factory())
            .build()
            .unwrap();
        assert!(matches!(
            orch.run("anything").await,
            Err(OrchestratorError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_review_feedback_inserts_fix_round() {
        let team = Team::new()
            .role(
                "TaskDecomposer",
                ScriptedTransport::texts([plan(json!([
                    {"id": "S1", "assignee": "CodingAgent", "description": "implement parser"},
                    {"id": "S2", "assignee": "ReviewerAgent", "description": "review parser"}
                ]))]),
            )
            .role("CodingAgent", ScriptedTransport::texts(["parser done", "null check added"]))
            .role("ReviewerAgent", ScriptedTransport::texts(["Missing null check in parse()", "LGTM"]));

        let (result, _dir) = run(fast_config(), &team, "write a parser").await;

        assert_eq!(result.status, RunStatus::Completed, "error: {:?}", result.error);
        let ids: Vec<&str> = result.subtasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2", "S2-fix", "S2-recheck"]);

        let fix = result.subtask("S2-fix").unwrap();
        assert_eq!(fix.role, "CodingAgent");
        assert!(fix.description.contains("Missing null check"));
        assert_eq!(fix.round, 1);
        assert_eq!(result.subtask("S2-recheck").unwrap().result.as_deref(), Some("LGTM"));
        assert!(result
            .trace
            .iter()
            .any(|e| matches!(&e.kind, TraceKind::FollowUp { round: 1, .. })));
    }

    #[tokio::test]
    async fn test_permanent_failure_triggers_replan() {
        let mut cfg = fast_config();
        cfg.orchestrator.max_subtask_retries = 0;
        let team = Team::new()
            .role(
                "TaskDecomposer",
                ScriptedTransport::texts([
                    plan(json!([{"id": "S1", "assignee": "DefaultAgent", "description": "first approach"}])),
                    plan(json!([{"id": "R1", "assignee": "DefaultAgent", "description": "second approach"}])),
                ]),
            )
            .role(
                "DefaultAgent",
                ScriptedTransport::new(vec![Err(LlmError::InvalidRequest("context too long".into()))]),
            );

        let (result, _dir) = run(cfg, &team, "try twice").await;

        assert_eq!(result.status, RunStatus::Completed, "error: {:?}", result.error);
        assert_eq!(result.replans, 1);
        assert_eq!(result.retired.len(), 1);
        assert_eq!(result.retired[0].status, SubtaskStatus::Failed);
        assert_eq!(result.subtask("R1").unwrap().status, SubtaskStatus::Completed);

        let seen = team.get("TaskDecomposer").seen();
        assert!(seen[1].iter().any(|m| m.content.contains("failed at step [S1]")));
    }

    #[tokio::test]
    async fn test_acceptance_rejection_requeues_with_feedback() {
        let mut cfg = fast_config();
        cfg.orchestrator.acceptance.enabled = true;
        cfg.orchestrator.acceptance.roles = vec!["CodingAgent".into()];
        let team = Team::new()
            .role(
                "TaskDecomposer",
                ScriptedTransport::texts([plan(json!([
                    {"id": "S1", "assignee": "CodingAgent", "description": "trim whitespace"}
                ]))]),
            )
            .role("CodingAgent", ScriptedTransport::texts(["v1", "v2"]))
            .role(
                "EvaluatorAgent",
                ScriptedTransport::texts(["REJECT handle empty input", "ACCEPT"]),
            );

        let (result, _dir) = run(cfg, &team, "trim").await;

        assert_eq!(result.status, RunStatus::Completed, "error: {:?}", result.error);
        let s1 = result.subtask("S1").unwrap();
        assert_eq!(s1.result.as_deref(), Some("v2"));
        assert_eq!(s1.attempts, 2);
        assert_eq!(s1.feedback, vec!["handle empty input".to_string()]);

        let seen = team.get("CodingAgent").seen();
        assert!(seen[1].iter().any(|m| m.content.contains("handle empty input")));
        let verdicts: Vec<bool> = result
            .trace
            .iter()
            .filter_map(|e| match &e.kind {
                TraceKind::Verdict { accepted, .. } => Some(*accepted),
                _ => None,
            })
            .collect();
        assert_eq!(verdicts, vec![false, true]);
    }

    #[tokio::test]
    async fn test_test_failure_fix_is_drafted_by_evaluator() {
        let drafted = "Handle empty input in parse() so that test_empty_input passes";
        let team = Team::new()
            .role(
                "TaskDecomposer",
                ScriptedTransport::texts([plan(json!([
                    {"id": "S1", "assignee": "CodingAgent", "description": "implement parser"},
                    {"id": "S2", "assignee": "TestingAgent", "description": "run the parser tests"}
                ]))]),
            )
            .role("CodingAgent", ScriptedTransport::texts(["parser done", "empty input handled"]))
            .role(
                "TestingAgent",
                ScriptedTransport::texts(["Test Result: FAILED\ntest_empty_input ... FAIL", "all 5 tests passed"]),
            )
            .role("EvaluatorAgent", ScriptedTransport::texts([drafted]));

        let (result, _dir) = run(fast_config(), &team, "write a parser").await;

        assert_eq!(result.status, RunStatus::Completed, "error: {:?}", result.error);
        let ids: Vec<&str> = result.subtasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2", "S2-fix", "S2-recheck"]);

        let fix = result.subtask("S2-fix").unwrap();
        assert_eq!(fix.role, "CodingAgent");
        assert_eq!(fix.description, drafted);
        assert_eq!(fix.result.as_deref(), Some("empty input handled"));
        let recheck = result.subtask("S2-recheck").unwrap();
        assert_eq!(recheck.role, "TestingAgent");
        assert_eq!(recheck.result.as_deref(), Some("all 5 tests passed"));

        let evaluator = team.get("EvaluatorAgent");
        assert_eq!(evaluator.calls(), 1);
        assert!(evaluator.seen()[0].iter().any(|m| m.content.contains("test_empty_input ... FAIL")));
        // 修复角色的简报里是起草好的描述
        let coding = team.get("CodingAgent").seen();
        assert!(coding[1].iter().any(|m| m.content.contains(drafted)));
    }

    /// 记录同时进行中的调用数峰值
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ModelTransport for Gauge {
        async fn invoke(&self, _messages: &[Message], _tools: &[ToolSchema]) -> Result<ModelReply, LlmError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ModelReply::Text("done".into()))
        }
    }

    #[tokio::test]
    async fn test_concurrency_bound_and_per_subtask_trace_order() {
        let mut cfg = fast_config();
        cfg.orchestrator.max_concurrent_subtasks = 2;
        let decomposer = Arc::new(ScriptedTransport::texts([plan(json!([
            {"id": "A", "assignee": "DefaultAgent", "description": "a", "depends_on": []},
            {"id": "B", "assignee": "DefaultAgent", "description": "b", "depends_on": []},
            {"id": "C", "assignee": "DefaultAgent", "description": "c", "depends_on": []},
            {"id": "D", "assignee": "DefaultAgent", "description": "d", "depends_on": []},
            {"id": "E", "assignee": "DefaultAgent", "description": "e", "depends_on": []}
        ]))]));
        let gauge = Arc::new(Gauge {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let factory: TransportFactory = {
            let gauge = gauge.clone();
            Arc::new(move |cfg: &AgentConfig| -> Arc<dyn ModelTransport> {
                if cfg.role == "TaskDecomposer" {
                    decomposer.clone() as Arc<dyn ModelTransport>
                } else {
                    gauge.clone() as Arc<dyn ModelTransport>
                }
            })
        };
        let dir = tempfile::tempdir().unwrap();
        let orch = OrchestratorBuilder::new(cfg, dir.path())
            .with_transport_factory(factory)
            .build()
            .unwrap();

        let result = orch.run("five independent steps").await.unwrap();

        assert_eq!(result.status, RunStatus::Completed, "error: {:?}", result.error);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);

        let t = &result.trace;
        for id in ["A", "B", "C", "D", "E"] {
            let ready = index_of(t, id, SubtaskStatus::Ready);
            let running = index_of(t, id, SubtaskStatus::Running);
            let done = index_of(t, id, SubtaskStatus::Completed);
            assert!(ready < running && running < done, "{} out of order", id);
        }
        assert!(t.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn test_plan_assigning_work_to_evaluator_is_reasked() {
        let team = Team::new().role(
            "TaskDecomposer",
            ScriptedTransport::texts([
                plan(json!([{"id": "S1", "assignee": "EvaluatorAgent", "description": "judge the idea"}])),
                plan(json!([{"id": "S1", "assignee": "DefaultAgent", "description": "do the work"}])),
            ]),
        );

        let (result, _dir) = run(fast_config(), &team, "do it").await;

        assert_eq!(result.status, RunStatus::Completed, "error: {:?}", result.error);
        assert_eq!(result.subtask("S1").unwrap().role, "DefaultAgent");
        let seen = team.get("TaskDecomposer").seen();
        assert_eq!(seen.len(), 2);
        let offered: Vec<&str> = seen[0]
            .iter()
            .flat_map(|m| m.content.lines())
            .filter(|l| l.starts_with("Available roles:"))
            .collect();
        assert_eq!(offered.len(), 1);
        assert!(!offered[0].contains("EvaluatorAgent"));
        assert!(!offered[0].contains("TaskDecomposer"));
        assert!(seen[1].iter().any(|m| m.content.contains("unknown role 'EvaluatorAgent'")));
    }
}
