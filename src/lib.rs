//! Hive - Rust 多角色智能体编排核心
//!
//! 模块划分：
//! - **agents**: 角色配置、Agent（单回合模型调用）与 AgentRegistry
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 主控编排、预算监管、恢复策略、执行轨迹
//! - **llm**: 模型客户端与传输层（OpenAI 兼容 / Mock / 脚本化）
//! - **memory**: 子任务对话上下文
//! - **plan**: 子任务、依赖图、任务分解与计划板
//! - **react**: 子任务 worker 的回合循环、简报与评估
//! - **tools**: 工具契约、内置工具与执行器

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod react;
pub mod tools;

pub use crate::core::{Orchestrator, OrchestratorBuilder, OrchestratorError, RunResult, RunStatus};
