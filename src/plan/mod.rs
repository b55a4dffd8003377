//! 计划层：子任务状态机、依赖图、计划板与任务分解

pub mod board;
pub mod decomposer;
pub mod graph;
pub mod subtask;

pub use board::{PlanLine, TaskBoard};
pub use decomposer::{parse_plan, validate_plan, TaskDecomposer, ValidationError};
pub use graph::PlanGraph;
pub use subtask::{Subtask, SubtaskStatus, TransitionError};
