//! Types for critical path calculation.

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;

/// Computed dates and float for one task.
///
/// Finish dates are exclusive: a task occupies the working days in
/// `[early_start, early_finish)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskTiming {
    pub early_start: NaiveDate,
    pub early_finish: NaiveDate,
    pub late_start: NaiveDate,
    pub late_finish: NaiveDate,
    /// Signed working days between early and late start.
    pub total_float: i64,
    /// Working days before the earliest successor would be pushed.
    pub free_float: i64,
    pub is_critical: bool,
}

/// Roll-up of a summary task over its descendants.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SummaryRollup {
    #[serde(flatten)]
    pub timing: TaskTiming,
    pub duration_days: i64,
    pub percent_complete: f64,
}

/// Output of one forward/backward pass over a project.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CriticalPathResult {
    pub timings: FxHashMap<String, TaskTiming>,
    pub summaries: FxHashMap<String, SummaryRollup>,
    /// Scheduled (non-summary) task ids in topological order.
    pub order: Vec<String>,
    pub project_start: Option<NaiveDate>,
    pub project_finish: Option<NaiveDate>,
}

impl CriticalPathResult {
    pub fn timing(&self, task_id: &str) -> Option<&TaskTiming> {
        self.timings.get(task_id)
    }

    pub fn early_start(&self, task_id: &str) -> Option<NaiveDate> {
        self.timings.get(task_id).map(|t| t.early_start)
    }

    pub fn is_critical(&self, task_id: &str) -> bool {
        self.timings.get(task_id).is_some_and(|t| t.is_critical)
    }

    /// Critical task ids in topological order.
    pub fn critical_path(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.is_critical(id))
            .cloned()
            .collect()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CriticalPathError {
    #[error("Circular dependency detected among tasks: {}", task_ids.join(", "))]
    CycleDetected { task_ids: Vec<String> },
    #[error("Project has no start date and task {task_id} has no planned start")]
    MissingProjectStart { task_id: String },
}
