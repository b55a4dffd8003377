//! 记忆层：子任务对话上下文

pub mod conversation;

pub use conversation::{Conversation, Message, Role};
