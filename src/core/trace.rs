//! RunTrace：一次运行的追加式审计日志
//!
//! 记录子任务状态转换、模型回合、工具调用、计划事件与验收结论。追加在锁内完成并分配序号；
//! 同一子任务的事件只由持有它的一方按顺序写入，因此单个子任务内的顺序总是保持。

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::RunStatus;
use crate::plan::SubtaskStatus;
use crate::tools::ToolCall;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceKind {
    RunStarted { goal: String },
    PlanCreated { attempt: u32, subtasks: Vec<String> },
    PlanRejected { attempt: u32, error: String },
    Replanned { replan: u32, reason: String },
    Transition {
        from: SubtaskStatus,
        to: SubtaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    ModelTurn { turn: usize, outcome: String },
    ToolCall { call: ToolCall },
    TransportRetry { attempt: u32, error: String },
    Verdict { accepted: bool, feedback: String },
    FollowUp { fix: String, recheck: String, round: u32 },
    BudgetExhausted { reason: String },
    RunFinished { status: RunStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask: Option<String>,
    #[serde(flatten)]
    pub kind: TraceKind,
}

#[derive(Debug, Default)]
pub struct RunTrace {
    events: Mutex<Vec<TraceEvent>>,
}

impl RunTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, subtask: Option<&str>, kind: TraceKind) {
        let Ok(mut events) = self.events.lock() else {
            tracing::error!("run trace lock poisoned, event dropped");
            return;
        };
        let seq = events.len() as u64;
        events.push(TraceEvent {
            seq,
            at: Utc::now(),
            subtask: subtask.map(str::to_string),
            kind,
        });
    }

    pub fn transition(&self, id: &str, from: SubtaskStatus, to: SubtaskStatus, detail: Option<String>) {
        self.record(Some(id), TraceKind::Transition { from, to, detail });
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn for_subtask(&self, id: &str) -> Vec<TraceEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.subtask.as_deref() == Some(id))
            .collect()
    }

    /// 某子任务经历的状态序列（含初始 Pending）
    pub fn statuses_of(&self, id: &str) -> Vec<SubtaskStatus> {
        let mut out = vec![SubtaskStatus::Pending];
        for e in self.for_subtask(id) {
            if let TraceKind::Transition { to, .. } = e.kind {
                out.push(to);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_append_keeps_per_subtask_order() {
        let trace = Arc::new(RunTrace::new());
        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|id| {
                let trace = trace.clone();
                std::thread::spawn(move || {
                    for turn in 0..50 {
                        trace.record(Some(id), TraceKind::ModelTurn { turn, outcome: "final".into() });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(trace.len(), 100);
        for id in ["a", "b"] {
            let turns: Vec<usize> = trace
                .for_subtask(id)
                .into_iter()
                .filter_map(|e| match e.kind {
                    TraceKind::ModelTurn { turn, .. } => Some(turn),
                    _ => None,
                })
                .collect();
            assert_eq!(turns, (0..50).collect::<Vec<_>>());
        }
        let seqs: Vec<u64> = trace.events().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_event_serializes_flat() {
        let trace = RunTrace::new();
        trace.transition("S1", SubtaskStatus::Pending, SubtaskStatus::Ready, None);
        let json = serde_json::to_value(&trace.events()[0]).unwrap();
        assert_eq!(json["type"], "transition");
        assert_eq!(json["subtask"], "S1");
        assert_eq!(json["to"], "Ready");
        assert_eq!(trace.statuses_of("S1"), vec![SubtaskStatus::Pending, SubtaskStatus::Ready]);
    }
}
