//! Choosing which conflicting task to delay.

use std::cmp::Ordering;

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::calendar::CalendarSet;
use crate::config::{LevelingOptions, LevelingOrder};
use crate::critical_path::CriticalPathResult;
use crate::log_checks;
use crate::models::Task;
use crate::overallocation::OverAllocation;

/// Sort key for delay candidates. The smallest key is delayed first.
///
/// Non-critical tasks always precede critical ones. Remaining ties go to the
/// later original start, then to the smaller task id.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateKey {
    /// (critical, -(float left after clearing the day), -original start, task_id)
    Float {
        critical: bool,
        slack_after: i64,
        original_start: NaiveDate,
        task_id: String,
    },
    /// (critical, -priority rank, -original start, task_id)
    Priority {
        critical: bool,
        rank: i64,
        original_start: NaiveDate,
        task_id: String,
    },
}

impl CandidateKey {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Float { task_id, .. } | Self::Priority { task_id, .. } => task_id,
        }
    }
}

impl Eq for CandidateKey {}

impl Ord for CandidateKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                Self::Float {
                    critical: c1,
                    slack_after: s1,
                    original_start: o1,
                    task_id: id1,
                },
                Self::Float {
                    critical: c2,
                    slack_after: s2,
                    original_start: o2,
                    task_id: id2,
                },
            ) => c1
                .cmp(c2)
                .then(s2.cmp(s1))
                .then(o2.cmp(o1))
                .then(id1.cmp(id2)),

            (
                Self::Priority {
                    critical: c1,
                    rank: r1,
                    original_start: o1,
                    task_id: id1,
                },
                Self::Priority {
                    critical: c2,
                    rank: r2,
                    original_start: o2,
                    task_id: id2,
                },
            ) => c1
                .cmp(c2)
                .then(r2.cmp(r1))
                .then(o2.cmp(o1))
                .then(id1.cmp(id2)),

            // Keys from different orderings are never mixed in one ranking.
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for CandidateKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of looking for a task to delay on one conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Delay(String),
    /// Every movable contributor is on the critical path.
    AllCritical,
    /// Nothing can move (milestones, started work, hard constraints).
    NoCandidate,
}

/// What candidate ranking needs to know about the current schedule.
pub struct SelectionContext<'a> {
    pub tasks: &'a FxHashMap<&'a str, &'a Task>,
    /// Priority rank per task, defaulted to snapshot position.
    pub ranks: &'a FxHashMap<&'a str, i64>,
    pub schedule: &'a CriticalPathResult,
    pub calendars: &'a CalendarSet,
    pub options: &'a LevelingOptions,
    pub original_starts: &'a FxHashMap<String, NaiveDate>,
    /// Tasks whose floor stopped having an effect.
    pub frozen: &'a FxHashSet<String>,
    /// Critical in the unleveled schedule; empty unless the critical path is respected.
    pub protected: &'a FxHashSet<String>,
    pub verbosity: u8,
}

pub fn select_candidate(conflict: &OverAllocation, ctx: &SelectionContext<'_>) -> Selection {
    let mut keys: Vec<CandidateKey> = Vec::new();
    let mut skipped_critical = 0usize;
    let mut skipped_other = 0usize;

    for task_id in &conflict.conflicting_task_ids {
        let (Some(task), Some(timing)) = (
            ctx.tasks.get(task_id.as_str()),
            ctx.schedule.timing(task_id),
        ) else {
            skipped_other += 1;
            continue;
        };
        if task.is_milestone() || task.is_summary() || task.is_pinned() {
            log_checks!(ctx.verbosity, "skip {}: pinned", task_id);
            skipped_other += 1;
            continue;
        }
        if ctx.frozen.contains(task_id) {
            log_checks!(ctx.verbosity, "skip {}: cannot move further", task_id);
            skipped_other += 1;
            continue;
        }
        let critical = timing.is_critical || ctx.protected.contains(task_id);
        if ctx.options.respect_critical_path && critical {
            log_checks!(ctx.verbosity, "skip {}: critical", task_id);
            skipped_critical += 1;
            continue;
        }

        let original_start = ctx
            .original_starts
            .get(task_id)
            .copied()
            .unwrap_or(timing.early_start);
        let key = match ctx.options.leveling_order {
            LevelingOrder::Float => {
                let cal = ctx.calendars.resolve(task.calendar_id.as_deref());
                let shift = cal.work_days_between(timing.early_start, conflict.date) + 1;
                CandidateKey::Float {
                    critical,
                    slack_after: timing.total_float - shift,
                    original_start,
                    task_id: task_id.clone(),
                }
            }
            LevelingOrder::Priority => CandidateKey::Priority {
                critical,
                rank: ctx.ranks.get(task_id.as_str()).copied().unwrap_or(0),
                original_start,
                task_id: task_id.clone(),
            },
        };
        log_checks!(ctx.verbosity, "candidate {:?}", key);
        keys.push(key);
    }

    match keys.into_iter().min() {
        Some(key) => Selection::Delay(key.task_id().to_string()),
        None if skipped_critical > 0 && skipped_other == 0 => Selection::AllCritical,
        None => Selection::NoCandidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn float_key(critical: bool, slack_after: i64, start: NaiveDate, id: &str) -> CandidateKey {
        CandidateKey::Float {
            critical,
            slack_after,
            original_start: start,
            task_id: id.to_string(),
        }
    }

    #[test]
    fn test_float_prefers_most_slack() {
        let mut keys = vec![
            float_key(false, 2, d(2025, 1, 6), "a"),
            float_key(false, 7, d(2025, 1, 6), "b"),
        ];
        keys.sort();
        assert_eq!(keys[0].task_id(), "b");
    }

    #[test]
    fn test_non_critical_always_first() {
        let mut keys = vec![
            float_key(true, 50, d(2025, 1, 6), "crit"),
            float_key(false, -3, d(2025, 1, 6), "free"),
        ];
        keys.sort();
        assert_eq!(keys[0].task_id(), "free");
    }

    #[test]
    fn test_ties_prefer_later_start_then_id() {
        let mut keys = vec![
            float_key(false, 4, d(2025, 1, 6), "a"),
            float_key(false, 4, d(2025, 1, 8), "c"),
            float_key(false, 4, d(2025, 1, 8), "b"),
        ];
        keys.sort();
        let order: Vec<&str> = keys.iter().map(|k| k.task_id()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_priority_delays_largest_rank() {
        let low = CandidateKey::Priority {
            critical: false,
            rank: 9,
            original_start: d(2025, 1, 6),
            task_id: "low".to_string(),
        };
        let high = CandidateKey::Priority {
            critical: false,
            rank: 1,
            original_start: d(2025, 1, 9),
            task_id: "high".to_string(),
        };
        assert!(low < high);
    }
}
