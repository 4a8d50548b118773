//! Synchronous analysis pipeline over one snapshot.
//!
//! validate -> calendars -> critical path -> (leveling) -> histogram and
//! conflicts. Shared by the HTTP service and the Python bindings.

use rustc_hash::FxHashMap;

use crate::calendar::CalendarSet;
use crate::config::{LevelingOptions, SolverConfig};
use crate::critical_path::{CriticalPathEngine, CriticalPathResult};
use crate::error::LevelingError;
use crate::histogram::{windows_from_schedule, DemandHistogram};
use crate::leveling::{LevelingResult, LevelingSolver};
use crate::log_changes;
use crate::models::{ProjectSnapshot, TaskDateUpdate};
use crate::overallocation::{detect_over_allocations, OverAllocation};

#[derive(Clone, Debug)]
pub struct ScheduleAnalysis {
    /// Final schedule: leveled when leveling ran.
    pub schedule: CriticalPathResult,
    /// Demand of the final schedule.
    pub histogram: DemandHistogram,
    /// Conflicts detected before leveling; leveling reports what remains.
    pub over_allocations: Vec<OverAllocation>,
    pub leveling: Option<LevelingResult>,
    /// Tasks whose start moved, with their new dates.
    pub updates: Vec<TaskDateUpdate>,
    /// Non-fatal notices such as calendar fallbacks.
    pub warnings: Vec<String>,
}

pub fn analyze_snapshot(
    snapshot: &ProjectSnapshot,
    options: &LevelingOptions,
    level: bool,
    config: &SolverConfig,
) -> Result<ScheduleAnalysis, LevelingError> {
    snapshot.validate()?;
    let calendars = CalendarSet::from_snapshot(snapshot);
    let engine = CriticalPathEngine::new(snapshot, &calendars)?.with_verbosity(config.verbosity);
    let initial = engine.run(&FxHashMap::default());
    log_changes!(
        config.verbosity,
        "critical path: {} tasks, {} critical, finish {:?}",
        initial.timings.len(),
        initial.critical_path().len(),
        initial.project_finish
    );

    if !level {
        let windows = windows_from_schedule(snapshot, &initial);
        let histogram = DemandHistogram::build(snapshot, &calendars, &windows);
        let over_allocations = detect_over_allocations(&histogram);
        return Ok(ScheduleAnalysis {
            schedule: initial,
            histogram,
            over_allocations,
            leveling: None,
            updates: Vec::new(),
            warnings: calendars.warnings(),
        });
    }

    let run = LevelingSolver::new(&engine, snapshot, &calendars, options, config).solve(initial);
    let updates = run
        .result
        .delays
        .iter()
        .filter_map(|delay| {
            let timing = run.schedule.timing(&delay.task_id)?;
            Some(TaskDateUpdate {
                task_id: delay.task_id.clone(),
                planned_start: timing.early_start,
                planned_finish: timing.early_finish,
                early_start: timing.early_start,
                early_finish: timing.early_finish,
            })
        })
        .collect();

    Ok(ScheduleAnalysis {
        schedule: run.schedule,
        histogram: run.histogram,
        over_allocations: run.initial_over_allocations,
        leveling: Some(run.result),
        updates,
        warnings: calendars.warnings(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Assignment, Dependency, Project, Resource, Task};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn conflicting_snapshot() -> ProjectSnapshot {
        let mut project = Project::new(Uuid::nil());
        project.planned_start = Some(d(2025, 1, 6));
        project.planned_finish = Some(d(2025, 2, 28));
        let mut snap = ProjectSnapshot::new(project);
        snap.tasks.push(Task::new("a", 2));
        snap.tasks.push(Task::new("b", 2));
        snap.resources.push(Resource::new("crew", 1.0));
        snap.assignments.push(Assignment::new("a", "crew", 1.0));
        snap.assignments.push(Assignment::new("b", "crew", 1.0));
        snap
    }

    #[test]
    fn test_analysis_without_leveling_reports_conflicts() {
        let snap = conflicting_snapshot();
        let analysis =
            analyze_snapshot(&snap, &LevelingOptions::default(), false, &SolverConfig::default())
                .unwrap();
        assert!(analysis.leveling.is_none());
        assert!(analysis.updates.is_empty());
        assert_eq!(analysis.over_allocations.len(), 2);
    }

    #[test]
    fn test_leveling_produces_write_back_updates() {
        let snap = conflicting_snapshot();
        let analysis =
            analyze_snapshot(&snap, &LevelingOptions::default(), true, &SolverConfig::default())
                .unwrap();
        let leveling = analysis.leveling.unwrap();
        assert_eq!(leveling.remaining, 0);
        assert_eq!(leveling.resolved, 2);
        // Reported conflicts are the ones leveling started from.
        assert_eq!(analysis.over_allocations.len(), 2);
        assert!(!analysis
            .histogram
            .daily_usage()
            .values()
            .flatten()
            .any(|day| day.over_allocated));
        assert_eq!(analysis.updates.len(), 1);
        let update = &analysis.updates[0];
        // Full tie on float and start: the smaller id moves.
        assert_eq!(update.task_id, "a");
        assert_eq!(update.planned_start, d(2025, 1, 8));
        assert_eq!(update.planned_finish, d(2025, 1, 10));
    }

    #[test]
    fn test_reapplying_updates_is_idempotent() {
        let mut snap = conflicting_snapshot();
        let analysis =
            analyze_snapshot(&snap, &LevelingOptions::default(), true, &SolverConfig::default())
                .unwrap();
        for update in &analysis.updates {
            let task = snap.tasks.iter_mut().find(|t| t.id == update.task_id).unwrap();
            task.planned_start = Some(update.planned_start);
            task.planned_finish = Some(update.planned_finish);
        }
        let again =
            analyze_snapshot(&snap, &LevelingOptions::default(), true, &SolverConfig::default())
                .unwrap();
        assert!(again.leveling.unwrap().delays.is_empty());
        assert!(again.updates.is_empty());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut snap = conflicting_snapshot();
        snap.tasks[0]
            .predecessors
            .push(Dependency::finish_to_start("b"));
        snap.tasks[1]
            .predecessors
            .push(Dependency::finish_to_start("a"));
        let err =
            analyze_snapshot(&snap, &LevelingOptions::default(), true, &SolverConfig::default())
                .unwrap_err();
        assert_eq!(
            err,
            LevelingError::CycleDetected {
                task_ids: vec!["a".to_string(), "b".to_string()]
            }
        );
    }
}
