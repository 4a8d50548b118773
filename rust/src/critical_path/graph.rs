//! Precedence graph and topological ordering.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::models::{Relation, Task};

use super::types::CriticalPathError;

/// Dense position of a task in a [`ProjectGraph`].
pub type TaskIdx = u32;

/// One precedence edge, seen from either end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// The task at the other end of the edge.
    pub task: TaskIdx,
    pub relation: Relation,
    pub lag_days: i64,
}

/// Precedence graph over the scheduled (non-summary) tasks of a project.
///
/// Nodes are numbered in snapshot order so the passes run over plain vectors.
#[derive(Clone, Debug)]
pub struct ProjectGraph {
    ids: Vec<String>,
    preds: Vec<Vec<Edge>>,
    succs: Vec<Vec<Edge>>,
    order: Vec<TaskIdx>,
}

impl ProjectGraph {
    /// Build the graph and its topological order.
    ///
    /// Summary tasks are not nodes, and edges touching them are dropped.
    pub fn build(tasks: &[Task]) -> Result<Self, CriticalPathError> {
        let mut slots: FxHashMap<&str, TaskIdx> =
            FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());
        let mut ids: Vec<String> = Vec::with_capacity(tasks.len());
        for task in tasks.iter().filter(|t| !t.is_summary()) {
            if !slots.contains_key(task.id.as_str()) {
                slots.insert(task.id.as_str(), ids.len() as TaskIdx);
                ids.push(task.id.clone());
            }
        }

        let n = ids.len();
        let mut preds: Vec<Vec<Edge>> = vec![Vec::new(); n];
        let mut succs: Vec<Vec<Edge>> = vec![Vec::new(); n];
        for task in tasks {
            let Some(&to) = slots.get(task.id.as_str()) else {
                continue;
            };
            for dep in &task.predecessors {
                let Some(&from) = slots.get(dep.predecessor_id.as_str()) else {
                    continue;
                };
                preds[to as usize].push(Edge {
                    task: from,
                    relation: dep.relation,
                    lag_days: dep.lag_days,
                });
                succs[from as usize].push(Edge {
                    task: to,
                    relation: dep.relation,
                    lag_days: dep.lag_days,
                });
            }
        }

        let order = topological_order(&preds, &succs).map_err(|remaining| {
            let mut task_ids: Vec<String> = remaining
                .into_iter()
                .map(|idx| ids[idx as usize].clone())
                .collect();
            task_ids.sort();
            CriticalPathError::CycleDetected { task_ids }
        })?;

        Ok(Self {
            ids,
            preds,
            succs,
            order,
        })
    }

    /// Task ids by node position.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn id(&self, idx: TaskIdx) -> &str {
        &self.ids[idx as usize]
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn order(&self) -> &[TaskIdx] {
        &self.order
    }

    pub fn predecessors(&self, idx: TaskIdx) -> &[Edge] {
        &self.preds[idx as usize]
    }

    pub fn successors(&self, idx: TaskIdx) -> &[Edge] {
        &self.succs[idx as usize]
    }
}

/// Kahn's algorithm. On failure returns the tasks on or between cycles.
fn topological_order(preds: &[Vec<Edge>], succs: &[Vec<Edge>]) -> Result<Vec<TaskIdx>, Vec<TaskIdx>> {
    let n = preds.len();
    let mut in_degree: Vec<usize> = preds.iter().map(Vec::len).collect();
    let mut queue: VecDeque<TaskIdx> = (0..n as TaskIdx)
        .filter(|&idx| in_degree[idx as usize] == 0)
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(idx) = queue.pop_front() {
        order.push(idx);
        for edge in &succs[idx as usize] {
            let degree = &mut in_degree[edge.task as usize];
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(edge.task);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    // What Kahn leaves behind is every cycle plus everything downstream of
    // one. Peel off nodes with no successors left in the remainder.
    let mut remaining: Vec<bool> = in_degree.iter().map(|&deg| deg > 0).collect();
    let mut out_degree: Vec<usize> = (0..n)
        .map(|i| {
            if remaining[i] {
                succs[i].iter().filter(|e| remaining[e.task as usize]).count()
            } else {
                0
            }
        })
        .collect();
    let mut sinks: VecDeque<usize> = (0..n)
        .filter(|&i| remaining[i] && out_degree[i] == 0)
        .collect();
    while let Some(i) = sinks.pop_front() {
        remaining[i] = false;
        for edge in &preds[i] {
            let p = edge.task as usize;
            if remaining[p] {
                out_degree[p] -= 1;
                if out_degree[p] == 0 {
                    sinks.push_back(p);
                }
            }
        }
    }

    Err((0..n as TaskIdx).filter(|&i| remaining[i as usize]).collect())
}
