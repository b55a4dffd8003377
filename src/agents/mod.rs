//! 角色层：实现标识、Agent 与按需构造的 AgentRegistry

pub mod agent;
pub mod registry;
pub mod roles;

pub use agent::{Agent, AgentConfig, AgentTurn};
pub use registry::AgentRegistry;
pub use roles::RoleKind;
