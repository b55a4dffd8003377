//! 运行状态：编排状态机的阶段与终态

use std::fmt;

use serde::{Deserialize, Serialize};

/// 编排阶段：Planning -> Dispatching -> {Dispatching, Evaluating} -> {Completed, Failed}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning,
    Dispatching,
    Evaluating,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn can_become(self, to: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, to),
            (Planning, Dispatching)
                | (Planning, Failed)
                | (Dispatching, Dispatching)
                | (Dispatching, Evaluating)
                | (Dispatching, Planning)
                | (Dispatching, Completed)
                | (Dispatching, Failed)
                | (Evaluating, Dispatching)
                | (Evaluating, Planning)
                | (Evaluating, Completed)
                | (Evaluating, Failed)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Planning => "planning",
            RunPhase::Dispatching => "dispatching",
            RunPhase::Evaluating => "evaluating",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// 一次运行的终态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}
