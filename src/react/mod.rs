//! 子任务执行：简报、回合循环 worker 与结果评估

pub mod briefing;
pub mod evaluator;
pub mod loop_;

pub use briefing::build_briefing;
pub use evaluator::{draft_fix, follow_up_needed, parse_verdict, AcceptanceGate, FollowUpNeed, Verdict};
pub use loop_::{Assignment, WorkerShared};
