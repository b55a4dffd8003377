//! 子任务依赖图
//!
//! 使用邻接表和入度表实现 DAG 拓扑排序；同一层内按分解顺序出队，保证结果稳定。

use std::collections::{BTreeSet, HashMap};

/// 子任务依赖图（只描述边，不持有子任务本身）
#[derive(Debug, Clone, Default)]
pub struct PlanGraph {
    /// 分解顺序
    order: Vec<String>,
    position: HashMap<String, usize>,
    /// 邻接表：子任务 ID -> 依赖它的子任务
    adjacency: HashMap<String, Vec<String>>,
    /// 入度表：子任务 ID -> 图内前置数量
    in_degree: HashMap<String, usize>,
}

impl PlanGraph {
    /// nodes 为 (id, 前置 id 列表)，按分解顺序给出；指向图外的前置被忽略
    pub fn new<'a, I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let nodes: Vec<(&str, &[String])> = nodes.into_iter().collect();
        let mut graph = PlanGraph::default();
        for (id, _) in &nodes {
            if graph.position.contains_key(*id) {
                continue;
            }
            graph.position.insert(id.to_string(), graph.order.len());
            graph.order.push(id.to_string());
            graph.adjacency.insert(id.to_string(), Vec::new());
            graph.in_degree.insert(id.to_string(), 0);
        }
        for (id, prerequisites) in &nodes {
            for dep in prerequisites.iter() {
                if !graph.position.contains_key(dep) {
                    continue;
                }
                graph.adjacency.entry(dep.clone()).or_default().push(id.to_string());
                *graph.in_degree.entry(id.to_string()).or_insert(0) += 1;
            }
        }
        graph
    }

    pub fn dependents(&self, id: &str) -> &[String] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kahn 拓扑排序；返回 (已排序, 残留在环中或依赖环的节点)
    fn kahn(&self) -> (Vec<String>, Vec<String>) {
        let mut in_degree = self.in_degree.clone();
        let mut ready: BTreeSet<usize> = self
            .order
            .iter()
            .enumerate()
            .filter(|(_, id)| in_degree.get(*id) == Some(&0))
            .map(|(i, _)| i)
            .collect();

        let mut sorted = Vec::with_capacity(self.order.len());
        while let Some(i) = ready.pop_first() {
            let id = &self.order[i];
            sorted.push(id.clone());
            for dependent in self.dependents(id) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        if let Some(&pos) = self.position.get(dependent) {
                            ready.insert(pos);
                        }
                    }
                }
            }
        }

        let leftover = self
            .order
            .iter()
            .filter(|id| in_degree.get(*id).copied().unwrap_or(0) > 0)
            .cloned()
            .collect();
        (sorted, leftover)
    }

    /// 存在环时返回无法排序的节点（按分解顺序）
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let (_, leftover) = self.kahn();
        if leftover.is_empty() {
            None
        } else {
            Some(leftover)
        }
    }

    /// 稳定拓扑序：依赖在前，同层按分解顺序
    pub fn topological_order(&self) -> Vec<String> {
        let (mut sorted, leftover) = self.kahn();
        sorted.extend(leftover);
        sorted
    }
}
