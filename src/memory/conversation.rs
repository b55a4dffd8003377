//! 子任务上下文：对话历史
//!
//! 每个子任务持有一份 Conversation：首条为 briefing（固定保留），其后是 Agent 回合、
//! 工具观察与纠正提示；超出上限时从 briefing 之后剪枝最旧的消息。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 单个子任务的对话上下文；briefing 永不被剪枝
#[derive(Clone, Debug)]
pub struct Conversation {
    messages: Vec<Message>,
    max_messages: usize,
}

impl Conversation {
    pub fn new(briefing: impl Into<String>, max_messages: usize) -> Self {
        Self {
            messages: vec![Message::user(briefing)],
            max_messages: max_messages.max(2),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn briefing(&self) -> &str {
        &self.messages[0].content
    }

    /// 超出上限时丢弃 briefing 之后最旧的消息
    fn prune(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(1..1 + excess);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
