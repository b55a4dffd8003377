//! TaskBoard：协调者持有的当前计划
//!
//! 子任务按分解顺序存放。派发时子任务被移交给 worker（take_ready），板上只留下它的静态信息；
//! worker 交回（put_back）后才会据此推进依赖者，因此依赖者看不到评估到一半的前置。

use std::collections::HashMap;

use crate::plan::{PlanGraph, Subtask, SubtaskStatus};

/// 被派发中的子任务在板上的静态信息
#[derive(Debug, Clone)]
struct InFlight {
    title: String,
    role: String,
    prerequisites: Vec<String>,
}

/// 计划快照中的一行（用于简报）
#[derive(Debug, Clone, PartialEq)]
pub struct PlanLine {
    pub id: String,
    pub title: String,
    pub role: String,
    pub status: SubtaskStatus,
    pub result: Option<String>,
}

#[derive(Debug, Default)]
pub struct TaskBoard {
    order: Vec<String>,
    parked: HashMap<String, Subtask>,
    in_flight: HashMap<String, InFlight>,
}

impl TaskBoard {
    pub fn new(subtasks: Vec<Subtask>) -> Self {
        let mut board = TaskBoard::default();
        for s in subtasks {
            board.order.push(s.id.clone());
            board.parked.insert(s.id.clone(), s);
        }
        board
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.parked.contains_key(id) || self.in_flight.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Subtask> {
        self.parked.get(id)
    }

    fn status(&self, id: &str) -> Option<SubtaskStatus> {
        if self.in_flight.contains_key(id) {
            return Some(SubtaskStatus::Running);
        }
        self.parked.get(id).map(|s| s.status)
    }

    fn prerequisites(&self, id: &str) -> &[String] {
        if let Some(f) = self.in_flight.get(id) {
            return &f.prerequisites;
        }
        self.parked
            .get(id)
            .map(|s| s.prerequisites.as_slice())
            .unwrap_or(&[])
    }

    pub fn graph(&self) -> PlanGraph {
        PlanGraph::new(self.order.iter().map(|id| (id.as_str(), self.prerequisites(id))))
    }

    /// Pending 且前置全部 Completed 的子任务提升为 Ready；返回被提升的 id（分解顺序）
    pub fn promote_ready(&mut self) -> Vec<String> {
        let eligible: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.status(id) == Some(SubtaskStatus::Pending))
            .filter(|id| {
                self.prerequisites(id)
                    .iter()
                    .all(|dep| self.status(dep) == Some(SubtaskStatus::Completed))
            })
            .cloned()
            .collect();

        let mut promoted = Vec::with_capacity(eligible.len());
        for id in eligible {
            if let Some(s) = self.parked.get_mut(&id) {
                if s.transition(SubtaskStatus::Ready).is_ok() {
                    promoted.push(id);
                }
            }
        }
        promoted
    }

    /// 移出分解顺序中第一个 Ready 子任务交给 worker
    pub fn take_ready(&mut self) -> Option<Subtask> {
        let id = self
            .order
            .iter()
            .find(|id| self.parked.get(*id).map(|s| s.status) == Some(SubtaskStatus::Ready))?
            .clone();
        let subtask = self.parked.remove(&id)?;
        self.in_flight.insert(
            id,
            InFlight {
                title: subtask.title.clone(),
                role: subtask.role.clone(),
                prerequisites: subtask.prerequisites.clone(),
            },
        );
        Some(subtask)
    }

    /// worker 交回子任务
    pub fn put_back(&mut self, subtask: Subtask) {
        self.in_flight.remove(&subtask.id);
        if !self.order.contains(&subtask.id) {
            self.order.push(subtask.id.clone());
        }
        self.parked.insert(subtask.id.clone(), subtask);
    }

    /// worker 崩溃、子任务没能交回时，用板上的静态信息补一条 Failed 记录
    pub fn mark_lost(&mut self, id: &str, reason: impl Into<String>) -> Option<&Subtask> {
        let info = self.in_flight.remove(id)?;
        let mut s = Subtask::new(id, info.role, info.title.clone())
            .with_title(info.title)
            .with_prerequisites(info.prerequisites);
        s.status = SubtaskStatus::Running;
        s.fail(reason).ok()?;
        self.parked.insert(id.to_string(), s);
        self.parked.get(id)
    }

    pub fn all_completed(&self) -> bool {
        self.in_flight.is_empty()
            && self
                .order
                .iter()
                .all(|id| self.status(id) == Some(SubtaskStatus::Completed))
    }

    /// 插入一轮修复：fix 依赖被标记的子任务，recheck 依赖 fix；
    /// 原本依赖被标记子任务、仍在 Pending 的子任务改为依赖 recheck
    pub fn insert_follow_up(&mut self, flagged: &str, fix: Subtask, recheck: Subtask) {
        let fix_id = fix.id.clone();
        let recheck_id = recheck.id.clone();
        for s in self.parked.values_mut() {
            if s.status != SubtaskStatus::Pending || s.id == fix_id || s.id == recheck_id {
                continue;
            }
            for dep in s.prerequisites.iter_mut() {
                if dep == flagged {
                    *dep = recheck_id.clone();
                }
            }
        }

        let at = self
            .order
            .iter()
            .position(|id| id == flagged)
            .map(|p| p + 1)
            .unwrap_or(self.order.len());
        self.order.insert(at, recheck_id.clone());
        self.order.insert(at, fix_id.clone());
        self.parked.insert(fix_id, fix);
        self.parked.insert(recheck_id, recheck);
    }

    /// 给派生子任务生成不冲突的 id
    pub fn unique_id(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}-{}", base, n))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn snapshot(&self) -> Vec<PlanLine> {
        self.order
            .iter()
            .filter_map(|id| {
                if let Some(f) = self.in_flight.get(id) {
                    return Some(PlanLine {
                        id: id.clone(),
                        title: f.title.clone(),
                        role: f.role.clone(),
                        status: SubtaskStatus::Running,
                        result: None,
                    });
                }
                self.parked.get(id).map(|s| PlanLine {
                    id: s.id.clone(),
                    title: s.title.clone(),
                    role: s.role.clone(),
                    status: s.status,
                    result: s.result.clone(),
                })
            })
            .collect()
    }

    /// 按依赖顺序拼接已完成子任务的结果
    pub fn assembled_output(&self) -> String {
        self.graph()
            .topological_order()
            .iter()
            .filter_map(|id| self.parked.get(id))
            .filter(|s| s.status == SubtaskStatus::Completed)
            .map(|s| {
                format!(
                    "## [{}] {} ({})\n{}",
                    s.id,
                    s.title,
                    s.role,
                    s.result.as_deref().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// 交出全部子任务（分解顺序）；仍在派发中的不包含在内
    pub fn into_subtasks(mut self) -> Vec<Subtask> {
        self.order
            .iter()
            .filter_map(|id| self.parked.remove(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s1_s2_s3() -> TaskBoard {
        TaskBoard::new(vec![
            Subtask::new("S1", "CodingAgent", "patch"),
            Subtask::new("S2", "TestingAgent", "tests").with_prerequisites(["S1"]),
            Subtask::new("S3", "ReviewerAgent", "review").with_prerequisites(["S1", "S2"]),
        ])
    }

    fn run_to_completion(board: &mut TaskBoard, result: &str) -> String {
        let mut s = board.take_ready().unwrap();
        s.transition(SubtaskStatus::Running).unwrap();
        s.complete(result).unwrap();
        let id = s.id.clone();
        board.put_back(s);
        id
    }

    #[test]
    fn test_dependents_wait_for_put_back() {
        let mut board = s1_s2_s3();
        assert_eq!(board.promote_ready(), vec!["S1".to_string()]);

        let mut s1 = board.take_ready().unwrap();
        s1.transition(SubtaskStatus::Running).unwrap();
        s1.complete("patched").unwrap();
        // 未交回前，S2 仍不可提升
        assert!(board.promote_ready().is_empty());
        board.put_back(s1);

        assert_eq!(board.promote_ready(), vec!["S2".to_string()]);
        run_to_completion(&mut board, "tests pass");
        assert_eq!(board.promote_ready(), vec!["S3".to_string()]);
        run_to_completion(&mut board, "LGTM");
        assert!(board.all_completed());

        let out = board.assembled_output();
        let p1 = out.find("[S1]").unwrap();
        let p2 = out.find("[S2]").unwrap();
        let p3 = out.find("[S3]").unwrap();
        assert!(p1 < p2 && p2 < p3);
    }

    #[test]
    fn test_follow_up_repoints_dependents() {
        let mut board = s1_s2_s3();
        board.promote_ready();
        run_to_completion(&mut board, "patched");
        board.promote_ready();
        run_to_completion(&mut board, "1 test FAILED");

        let fix = Subtask::new(board.unique_id("S2-fix"), "CodingAgent", "fix").with_prerequisites(["S2"]);
        let recheck = Subtask::new(board.unique_id("S2-recheck"), "TestingAgent", "tests")
            .with_prerequisites(["S2-fix"]);
        board.insert_follow_up("S2", fix, recheck);

        assert_eq!(
            board.get("S3").unwrap().prerequisites,
            vec!["S1".to_string(), "S2-recheck".to_string()]
        );
        let ids: Vec<String> = board.snapshot().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["S1", "S2", "S2-fix", "S2-recheck", "S3"]);
        assert_eq!(board.promote_ready(), vec!["S2-fix".to_string()]);
        assert_eq!(board.unique_id("S2-fix"), "S2-fix-2");
    }
}
