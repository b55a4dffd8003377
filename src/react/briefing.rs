//! 子任务简报：worker 交给 Agent 的第一条消息
//!
//! 内容：全局目标、整份计划（当前步骤带标记）、已完成步骤的结果、当前任务与之前尝试的反馈。

use std::fmt::Write;

use crate::plan::{PlanLine, Subtask, SubtaskStatus};

/// 执行历史中每条结果的最大字符数
const HISTORY_RESULT_CHARS: usize = 1_500;

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

pub fn build_briefing(goal: &str, plan: &[PlanLine], current: &Subtask) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Goal\n{}\n", goal);

    let _ = writeln!(out, "# Plan");
    for line in plan {
        let marker = if line.id == current.id { "  <- current step" } else { "" };
        let _ = writeln!(
            out,
            "- [{}] {} ({}, {}){}",
            line.id, line.title, line.role, line.status, marker
        );
    }

    let history: Vec<&PlanLine> = plan
        .iter()
        .filter(|l| l.status == SubtaskStatus::Completed && l.id != current.id)
        .collect();
    if !history.is_empty() {
        let _ = writeln!(out, "\n# Execution history");
        for line in history {
            let _ = writeln!(
                out,
                "## [{}] {} ({})\n{}",
                line.id,
                line.title,
                line.role,
                clip(line.result.as_deref().unwrap_or_default(), HISTORY_RESULT_CHARS)
            );
        }
    }

    let _ = writeln!(
        out,
        "\n# Your task [{}]: {}\n{}",
        current.id, current.title, current.description
    );

    if !current.feedback.is_empty() {
        let _ = writeln!(out, "\n# Feedback from previous attempts");
        for (i, f) in current.feedback.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, f);
        }
    }
    out
}
