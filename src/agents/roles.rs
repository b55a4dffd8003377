//! 角色实现标识 -> 行为
//!
//! 配置里的 implementation 字符串只在这里翻译成 RoleKind；默认指令与默认工具集也挂在 RoleKind 上。

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Decomposer,
    Coding,
    Testing,
    Reviewer,
    Evaluator,
    Default,
}

const DECOMPOSER_PROMPT: &str = "You are a task decomposer. Break the goal into a small number of \
ordered steps. Reply with a JSON array only. Each element has: \"id\" (string), \"assignee\" (one of \
the available roles), \"task\" (short title), \"description\" (what to do) and \"depends_on\" (ids of \
steps that must finish first).";

const CODING_PROMPT: &str = "You are a coding agent. Read the relevant files, make the requested \
change with the file tools, then reply with a short summary of what you changed.";

const TESTING_PROMPT: &str = "You are a testing agent. Write or update tests for the change, run them \
with run_tests, and report the outcome. Include the word FAIL in your answer if any test fails.";

const REVIEWER_PROMPT: &str = "You are a code reviewer. Inspect the change. If it is correct and \
complete, reply with exactly LGTM. Otherwise list the problems that must be fixed.";

const EVALUATOR_PROMPT: &str = "You are an evaluator. Judge whether a result satisfies its task. \
Reply with ACCEPT on the first line if it does, otherwise REJECT followed by concrete feedback.";

const DEFAULT_PROMPT: &str = "You are a helpful assistant working on one step of a larger goal. \
Complete the step and reply with the result.";

impl RoleKind {
    pub const ALL: [RoleKind; 6] = [
        RoleKind::Decomposer,
        RoleKind::Coding,
        RoleKind::Testing,
        RoleKind::Reviewer,
        RoleKind::Evaluator,
        RoleKind::Default,
    ];

    /// 大小写、下划线、连字符不敏感；接受 "coding" / "CodingAgent" / "coding_agent" 等写法
    pub fn from_implementation(id: &str) -> Option<Self> {
        let norm: String = id
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        let norm = norm.strip_suffix("agent").unwrap_or(&norm);
        match norm {
            "decomposer" | "taskdecomposer" | "planner" => Some(RoleKind::Decomposer),
            "coding" | "coder" => Some(RoleKind::Coding),
            "testing" | "tester" => Some(RoleKind::Testing),
            "reviewer" | "review" => Some(RoleKind::Reviewer),
            "evaluator" => Some(RoleKind::Evaluator),
            "default" | "" => Some(RoleKind::Default),
            _ => None,
        }
    }

    pub fn default_prompt(self) -> &'static str {
        match self {
            RoleKind::Decomposer => DECOMPOSER_PROMPT,
            RoleKind::Coding => CODING_PROMPT,
            RoleKind::Testing => TESTING_PROMPT,
            RoleKind::Reviewer => REVIEWER_PROMPT,
            RoleKind::Evaluator => EVALUATOR_PROMPT,
            RoleKind::Default => DEFAULT_PROMPT,
        }
    }

    pub fn default_tools(self) -> &'static [&'static str] {
        match self {
            RoleKind::Decomposer | RoleKind::Evaluator => &[],
            RoleKind::Coding => &["read_file", "list_files", "edit_file", "delete_file"],
            RoleKind::Testing => &["read_file", "list_files", "edit_file", "run_tests"],
            RoleKind::Reviewer | RoleKind::Default => &["read_file", "list_files"],
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleKind::Decomposer => "decomposer",
            RoleKind::Coding => "coding",
            RoleKind::Testing => "testing",
            RoleKind::Reviewer => "reviewer",
            RoleKind::Evaluator => "evaluator",
            RoleKind::Default => "default",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implementation_aliases() {
        assert_eq!(RoleKind::from_implementation("coding"), Some(RoleKind::Coding));
        assert_eq!(RoleKind::from_implementation("CodingAgent"), Some(RoleKind::Coding));
        assert_eq!(RoleKind::from_implementation("task_decomposer"), Some(RoleKind::Decomposer));
        assert_eq!(RoleKind::from_implementation("ReviewerAgent"), Some(RoleKind::Reviewer));
        assert_eq!(RoleKind::from_implementation("quantum"), None);
    }

    #[test]
    fn test_display_round_trips_through_from_implementation() {
        for kind in RoleKind::ALL {
            assert_eq!(RoleKind::from_implementation(&kind.to_string()), Some(kind));
        }
    }
}
