//! 核心编排层：错误与恢复、运行状态、运行监管、并发调度、执行轨迹、主控循环

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod run_supervisor;
pub mod state;
pub mod task_scheduler;
pub mod trace;

pub use builder::OrchestratorBuilder;
pub use error::OrchestratorError;
pub use orchestrator::{Orchestrator, RunResult};
pub use recovery::{Failure, RecoveryAction, RecoveryEngine};
pub use run_supervisor::RunSupervisor;
pub use state::{RunPhase, RunStatus};
pub use task_scheduler::TaskScheduler;
pub use trace::{RunTrace, TraceEvent, TraceKind};
