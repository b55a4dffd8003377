//! Subtask：一个委派给某个角色的工作单元
//!
//! 状态机：Pending -> Ready -> Running -> {Completed, Failed}；Running -> Pending 表示带反馈重新排队。
//! 其余转换一律拒绝。Pending/Ready 时由协调者修改，Running 时由持有它的 worker 修改。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubtaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
}

impl SubtaskStatus {
    fn can_become(self, to: SubtaskStatus) -> bool {
        use SubtaskStatus::*;
        matches!(
            (self, to),
            (Pending, Ready) | (Ready, Running) | (Running, Completed) | (Running, Failed) | (Running, Pending)
        )
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::Ready => "ready",
            SubtaskStatus::Running => "running",
            SubtaskStatus::Completed => "completed",
            SubtaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("illegal transition {from} -> {to} for subtask '{id}'")]
pub struct TransitionError {
    pub id: String,
    pub from: SubtaskStatus,
    pub to: SubtaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub role: String,
    pub prerequisites: Vec<String>,
    pub status: SubtaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    /// 进入 Running 的次数
    pub attempts: u32,
    /// 之前尝试得到的反馈（验收意见、失败原因）
    pub feedback: Vec<String>,
    pub turns_used: usize,
    /// 修复轮次派生的子任务指向最初被标记的子任务
    pub origin: Option<String>,
    pub round: u32,
}

impl Subtask {
    pub fn new(id: impl Into<String>, role: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        let title = description.lines().next().unwrap_or_default().chars().take(80).collect();
        Self {
            id: id.into(),
            title,
            description,
            role: role.into(),
            prerequisites: Vec::new(),
            status: SubtaskStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            feedback: Vec::new(),
            turns_used: 0,
            origin: None,
            round: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        if !title.trim().is_empty() {
            self.title = title;
        }
        self
    }

    pub fn with_prerequisites<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites = prerequisites.into_iter().map(Into::into).collect();
        self
    }

    pub fn transition(&mut self, to: SubtaskStatus) -> Result<(), TransitionError> {
        if !self.status.can_become(to) {
            return Err(TransitionError {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        if to == SubtaskStatus::Running {
            self.attempts += 1;
        }
        self.status = to;
        Ok(())
    }

    /// 记录结果并置为 Completed；已经 Completed 时不做任何修改并返回 false
    pub fn complete(&mut self, result: impl Into<String>) -> Result<bool, TransitionError> {
        if self.status == SubtaskStatus::Completed {
            return Ok(false);
        }
        self.transition(SubtaskStatus::Completed)?;
        self.result = Some(result.into());
        self.error = None;
        Ok(true)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(SubtaskStatus::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Running -> Pending，附带下一次尝试要看到的反馈
    pub fn requeue(&mut self, feedback: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(SubtaskStatus::Pending)?;
        self.feedback.push(feedback.into());
        self.result = None;
        Ok(())
    }

    /// 最初被标记的子任务 id（非派生子任务即自身）
    pub fn origin_id(&self) -> &str {
        self.origin.as_deref().unwrap_or(&self.id)
    }
}
