//! Greedy delay loop.

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::calendar::CalendarSet;
use crate::config::{LevelingOptions, SolverConfig};
use crate::critical_path::{CriticalPathEngine, CriticalPathResult};
use crate::histogram::{windows_from_schedule, DemandHistogram};
use crate::models::{ProjectSnapshot, Task};
use crate::overallocation::{detect_over_allocations, OverAllocation};
use crate::{log_changes, log_checks};

use super::selection::{select_candidate, Selection, SelectionContext};
use super::state::{LevelingState, SolverPhase};
use super::{LevelingDelay, LevelingResult};

/// Everything the solver leaves behind.
#[derive(Clone, Debug)]
pub struct LevelingRun {
    pub result: LevelingResult,
    /// Schedule after the last accepted move.
    pub schedule: CriticalPathResult,
    pub histogram: DemandHistogram,
    /// Conflicts in the unleveled schedule.
    pub initial_over_allocations: Vec<OverAllocation>,
    /// Conflicts still present in `schedule`.
    pub over_allocations: Vec<OverAllocation>,
}

pub struct LevelingSolver<'a> {
    engine: &'a CriticalPathEngine<'a>,
    snapshot: &'a ProjectSnapshot,
    calendars: &'a CalendarSet,
    options: &'a LevelingOptions,
    config: &'a SolverConfig,
}

impl<'a> LevelingSolver<'a> {
    pub fn new(
        engine: &'a CriticalPathEngine<'a>,
        snapshot: &'a ProjectSnapshot,
        calendars: &'a CalendarSet,
        options: &'a LevelingOptions,
        config: &'a SolverConfig,
    ) -> Self {
        Self {
            engine,
            snapshot,
            calendars,
            options,
            config,
        }
    }

    /// Project length in working days times task count, capped.
    pub fn max_iterations(&self, schedule: &CriticalPathResult) -> usize {
        let duration = match (schedule.project_start, schedule.project_finish) {
            (Some(start), Some(finish)) => self
                .calendars
                .default_calendar()
                .work_days_between(start, finish)
                .max(1) as usize,
            _ => 1,
        };
        duration
            .saturating_mul(self.engine.task_count().max(1))
            .min(self.config.max_iterations_cap)
    }

    /// Delay tasks one working day at a time until no conflict can be
    /// improved, starting from the unleveled `initial` schedule.
    pub fn solve(&self, initial: CriticalPathResult) -> LevelingRun {
        let verbosity = self.config.verbosity;
        let mut state = LevelingState::default();

        let tasks: FxHashMap<&str, &Task> = self
            .snapshot
            .tasks
            .iter()
            .map(|t| (t.id.as_str(), t))
            .collect();
        let ranks: FxHashMap<&str, i64> = self
            .snapshot
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), t.priority.map_or(i as i64, i64::from)))
            .collect();
        let original_starts: FxHashMap<String, NaiveDate> = initial
            .timings
            .iter()
            .map(|(id, t)| (id.clone(), t.early_start))
            .collect();
        let original_finish = initial.project_finish;
        let protected: FxHashSet<String> = if self.options.respect_critical_path {
            initial
                .timings
                .iter()
                .filter(|(_, t)| t.is_critical)
                .map(|(id, _)| id.clone())
                .collect()
        } else {
            FxHashSet::default()
        };

        let mut schedule = initial;
        let mut histogram = DemandHistogram::build(
            self.snapshot,
            self.calendars,
            &windows_from_schedule(self.snapshot, &schedule),
        );
        let initial_conflicts = detect_over_allocations(&histogram);
        let initial_count = initial_conflicts.len();
        let mut conflicts = initial_conflicts.clone();
        let max_iterations = self.max_iterations(&schedule);
        log_changes!(
            verbosity,
            "leveling {} over-allocations, at most {} iterations",
            initial_count,
            max_iterations
        );

        state.phase = SolverPhase::Resolving;
        let mut limit_hit = false;
        loop {
            let Some(conflict) = conflicts.iter().find(|c| !state.is_marked(c)).cloned() else {
                break;
            };
            if state.iterations >= max_iterations {
                limit_hit = true;
                break;
            }
            state.iterations += 1;

            let selection = {
                let ctx = SelectionContext {
                    tasks: &tasks,
                    ranks: &ranks,
                    schedule: &schedule,
                    calendars: self.calendars,
                    options: self.options,
                    original_starts: &original_starts,
                    frozen: state.frozen(),
                    protected: &protected,
                    verbosity,
                };
                select_candidate(&conflict, &ctx)
            };

            let task_id = match selection {
                Selection::Delay(task_id) => task_id,
                Selection::AllCritical => {
                    log_checks!(verbosity, "{} on {}: only critical tasks", conflict.resource_id, conflict.date);
                    state.mark_unresolvable(
                        &conflict,
                        format!(
                            "Over-allocation of {} ({}) on {} involves only critical-path tasks; not leveled",
                            conflict.resource_name, conflict.resource_id, conflict.date
                        ),
                    );
                    continue;
                }
                Selection::NoCandidate => {
                    log_checks!(verbosity, "{} on {}: nothing movable", conflict.resource_id, conflict.date);
                    state.mark_unresolvable(
                        &conflict,
                        format!(
                            "Over-allocation of {} ({}) on {} has no movable task",
                            conflict.resource_name, conflict.resource_id, conflict.date
                        ),
                    );
                    continue;
                }
            };

            let Some(current) = schedule.early_start(&task_id) else {
                state.freeze(&task_id);
                continue;
            };
            let calendar = self
                .calendars
                .resolve(tasks.get(task_id.as_str()).and_then(|t| t.calendar_id.as_deref()));
            let target = calendar.add_work_days(current, 1);
            let previous = state.set_floor(&task_id, target);
            let next = self.engine.run(&state.floors);

            // A start or finish constraint can cap the floor.
            if next.early_start(&task_id).map_or(true, |start| start <= current) {
                log_checks!(verbosity, "delay of {} had no effect", task_id);
                state.restore_floor(&task_id, previous);
                state.freeze(&task_id);
                continue;
            }

            if self.options.respect_critical_path
                && self.disturbs_protected(&next, &protected, &original_starts, original_finish)
            {
                log_checks!(verbosity, "delay of {} would move the critical path", task_id);
                state.restore_floor(&task_id, previous);
                state.freeze(&task_id);
                continue;
            }

            state.moves += 1;
            log_changes!(
                verbosity,
                "delay {} from {} to {} for {} on {}",
                task_id,
                current,
                target,
                conflict.resource_id,
                conflict.date
            );
            schedule = next;
            histogram = DemandHistogram::build(
                self.snapshot,
                self.calendars,
                &windows_from_schedule(self.snapshot, &schedule),
            );
            conflicts = detect_over_allocations(&histogram);
        }

        if limit_hit {
            state.warn(format!(
                "IterationLimitExceeded: stopped after {} iterations with {} over-allocations remaining",
                max_iterations,
                conflicts.len()
            ));
        }

        if let (Some(before), Some(after)) = (original_finish, schedule.project_finish) {
            if after > before {
                let days = self
                    .calendars
                    .default_calendar()
                    .work_days_between(before, after);
                state.warn(format!(
                    "Leveling delayed critical tasks: critical path extended by {} days (project finish {} -> {})",
                    days, before, after
                ));
            }
        }

        for conflict in &conflicts {
            let message = state.reason(conflict).map(str::to_string).unwrap_or_else(|| {
                format!(
                    "Could not resolve over-allocation of {} ({}) on {}",
                    conflict.resource_name, conflict.resource_id, conflict.date
                )
            });
            state.warn_once(conflict, message);
        }

        let remaining = conflicts.len();
        let resolved = initial_count.saturating_sub(remaining);
        state.phase = if remaining == 0 {
            SolverPhase::Resolved
        } else if resolved == 0 {
            SolverPhase::Unresolvable
        } else {
            SolverPhase::PartiallyResolved
        };
        debug_assert!(state.phase.is_terminal());

        let delays = self.collect_delays(&original_starts, &schedule);
        log_changes!(
            verbosity,
            "leveling {:?}: {} moves, {} tasks delayed, {} resolved, {} remaining",
            state.phase,
            state.moves,
            delays.len(),
            resolved,
            remaining
        );

        LevelingRun {
            result: LevelingResult {
                delays,
                resolved,
                remaining,
                iterations: state.iterations,
                warnings: state.warnings,
                outcome: state.phase,
            },
            schedule,
            histogram,
            initial_over_allocations: initial_conflicts,
            over_allocations: conflicts,
        }
    }

    /// Whether `next` moves the project finish or any initially critical task.
    fn disturbs_protected(
        &self,
        next: &CriticalPathResult,
        protected: &FxHashSet<String>,
        original_starts: &FxHashMap<String, NaiveDate>,
        original_finish: Option<NaiveDate>,
    ) -> bool {
        if next.project_finish > original_finish {
            return true;
        }
        protected
            .iter()
            .any(|id| next.early_start(id) != original_starts.get(id).copied())
    }

    /// Net start change per task, in snapshot order.
    fn collect_delays(
        &self,
        original_starts: &FxHashMap<String, NaiveDate>,
        schedule: &CriticalPathResult,
    ) -> Vec<LevelingDelay> {
        self.snapshot
            .tasks
            .iter()
            .filter_map(|task| {
                let original = *original_starts.get(&task.id)?;
                let new_start = schedule.early_start(&task.id)?;
                if new_start == original {
                    return None;
                }
                let calendar = self.calendars.resolve(task.calendar_id.as_deref());
                Some(LevelingDelay {
                    task_id: task.id.clone(),
                    original_start: original,
                    new_start,
                    delay_days: calendar.work_days_between(original, new_start),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LevelingOrder;
    use crate::models::{Assignment, Dependency, Project, Relation, Resource};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn make_task(id: &str, duration: i64, start: NaiveDate) -> Task {
        Task::new(id, duration).with_planned_start(start)
    }

    fn snapshot(tasks: Vec<Task>, capacity: f64, finish: Option<NaiveDate>) -> ProjectSnapshot {
        let mut project = Project::new(Uuid::nil());
        project.planned_start = Some(d(2025, 1, 6));
        project.planned_finish = finish;
        let mut snap = ProjectSnapshot::new(project);
        snap.resources.push(Resource::new("crew", capacity));
        for task in &tasks {
            snap.assignments.push(Assignment::new(task.id.clone(), "crew", 1.0));
        }
        snap.tasks = tasks;
        snap
    }

    fn level(snap: &ProjectSnapshot, options: LevelingOptions) -> LevelingRun {
        let calendars = CalendarSet::from_snapshot(snap);
        let engine = CriticalPathEngine::new(snap, &calendars).unwrap();
        let config = SolverConfig::default();
        let initial = engine.run(&FxHashMap::default());
        LevelingSolver::new(&engine, snap, &calendars, &options, &config).solve(initial)
    }

    fn assert_durations_hold(snap: &ProjectSnapshot, run: &LevelingRun) {
        let calendars = CalendarSet::from_snapshot(snap);
        for task in &snap.tasks {
            let t = run.schedule.timing(&task.id).unwrap();
            let cal = calendars.resolve(task.calendar_id.as_deref());
            assert_eq!(
                cal.work_days_between(t.early_start, t.early_finish),
                task.effective_duration(),
                "duration of {}",
                task.id
            );
        }
    }

    #[test]
    fn test_basic_conflict_delays_latest_task() {
        // Mon-Wed, Tue-Thu, Wed-Fri: three tasks overlap on Wednesday only.
        let snap = snapshot(
            vec![
                make_task("A", 3, d(2025, 1, 6)),
                make_task("B", 3, d(2025, 1, 7)),
                make_task("C", 3, d(2025, 1, 8)),
            ],
            2.0,
            Some(d(2025, 3, 31)),
        );
        let run = level(&snap, LevelingOptions::default());

        assert_eq!(
            run.result.delays,
            vec![LevelingDelay {
                task_id: "C".to_string(),
                original_start: d(2025, 1, 8),
                new_start: d(2025, 1, 9),
                delay_days: 1,
            }]
        );
        assert_eq!(run.result.resolved, 1);
        assert_eq!(run.result.remaining, 0);
        assert_eq!(run.result.outcome, SolverPhase::Resolved);
        assert!(run.result.warnings.is_empty());
        assert!(run.over_allocations.is_empty());
        assert_eq!(run.initial_over_allocations.len(), 1);
        assert_eq!(run.initial_over_allocations[0].date, d(2025, 1, 8));
        assert_durations_hold(&snap, &run);
    }

    #[test]
    fn test_protected_critical_path() {
        // X -> W is the critical chain; Y has plenty of float.
        let x = make_task("X", 2, d(2025, 1, 6));
        let w = Task::new("W", 5).with_predecessor(Dependency::finish_to_start("X"));
        let y = make_task("Y", 1, d(2025, 1, 6));
        let mut snap = snapshot(vec![x, w, y], 1.0, None);
        snap.assignments.retain(|a| a.task_id != "W");

        let run = level(&snap, LevelingOptions::default());
        assert_eq!(run.result.remaining, 0);
        assert_eq!(run.result.delays.len(), 1);
        assert_eq!(run.result.delays[0].task_id, "Y");
        assert_eq!(run.result.delays[0].new_start, d(2025, 1, 8));
        assert_eq!(run.schedule.early_start("X"), Some(d(2025, 1, 6)));
        assert_durations_hold(&snap, &run);
    }

    #[test]
    fn test_start_links_keep_critical_path_fixed() {
        // b drives c through SS, and a drives d through SF; only c and d have float.
        let a = make_task("A", 4, d(2025, 1, 6));
        let b = make_task("B", 4, d(2025, 1, 6));
        let c = Task::new("C", 3).with_predecessor(Dependency {
            predecessor_id: "B".into(),
            relation: Relation::StartToStart,
            lag_days: 0,
        });
        let dd = Task::new("D", 2).with_predecessor(Dependency {
            predecessor_id: "A".into(),
            relation: Relation::StartToFinish,
            lag_days: 0,
        });
        let snap = snapshot(vec![a, b, c, dd], 1.0, None);
        let calendars = CalendarSet::from_snapshot(&snap);
        let engine = CriticalPathEngine::new(&snap, &calendars).unwrap();
        let initial = engine.run(&FxHashMap::default());
        assert!(initial.is_critical("A") && initial.is_critical("B"));

        let run = level(&snap, LevelingOptions::default());
        assert_eq!(run.schedule.project_finish, Some(d(2025, 1, 10)));
        assert_eq!(run.schedule.early_start("A"), Some(d(2025, 1, 6)));
        assert_eq!(run.schedule.early_start("B"), Some(d(2025, 1, 6)));
        assert!(run.result.delays.iter().all(|d| d.task_id != "A" && d.task_id != "B"));
        assert!(!run
            .result
            .warnings
            .iter()
            .any(|w| w.contains("critical path extended")));
        assert!(run.result.remaining > 0);
        assert_durations_hold(&snap, &run);
    }

    #[test]
    fn test_only_critical_tasks_is_unresolvable() {
        let snap = snapshot(
            vec![make_task("P", 1, d(2025, 1, 6)), make_task("Q", 1, d(2025, 1, 6))],
            1.0,
            None,
        );
        let run = level(&snap, LevelingOptions::default());

        assert!(run.result.delays.is_empty());
        assert_eq!(run.result.resolved, 0);
        assert_eq!(run.result.remaining, 1);
        assert_eq!(run.result.outcome, SolverPhase::Unresolvable);
        assert_eq!(run.result.warnings.len(), 1);
        assert!(run.result.warnings[0].contains("crew"));
        assert!(run.result.warnings[0].contains("2025-01-06"));
    }

    #[test]
    fn test_critical_path_may_extend_when_allowed() {
        let snap = snapshot(
            vec![make_task("P", 1, d(2025, 1, 6)), make_task("Q", 1, d(2025, 1, 6))],
            1.0,
            None,
        );
        let options = LevelingOptions {
            respect_critical_path: false,
            leveling_order: LevelingOrder::Float,
        };
        let run = level(&snap, options);

        assert_eq!(run.result.remaining, 0);
        assert_eq!(run.result.delays.len(), 1);
        // Full tie falls through to the smaller id.
        assert_eq!(run.result.delays[0].task_id, "P");
        assert!(run
            .result
            .warnings
            .iter()
            .any(|w| w.contains("critical path extended by 1 days")));
    }

    #[test]
    fn test_priority_order_delays_least_important() {
        let mut first = make_task("first", 1, d(2025, 1, 6));
        first.priority = Some(1);
        let mut second = make_task("second", 1, d(2025, 1, 6));
        second.priority = Some(5);
        let snap = snapshot(vec![first, second], 1.0, Some(d(2025, 1, 31)));
        let options = LevelingOptions {
            respect_critical_path: true,
            leveling_order: LevelingOrder::Priority,
        };
        let run = level(&snap, options);
        assert_eq!(run.result.delays.len(), 1);
        assert_eq!(run.result.delays[0].task_id, "second");
    }

    #[test]
    fn test_started_work_never_moves() {
        let mut started = make_task("started", 1, d(2025, 1, 6));
        started.percent_complete = 20.0;
        let mut pinned = make_task("pinned", 1, d(2025, 1, 6));
        pinned.percent_complete = 50.0;
        let snap = snapshot(vec![started, pinned], 1.0, Some(d(2025, 1, 31)));
        let run = level(&snap, LevelingOptions::default());
        assert!(run.result.delays.is_empty());
        assert_eq!(run.result.remaining, 1);
        assert!(run.result.warnings[0].contains("no movable task"));
    }

    #[test]
    fn test_successors_are_pushed_and_reported() {
        let mut a = make_task("a", 1, d(2025, 1, 6));
        a.percent_complete = 10.0;
        let b = make_task("b", 1, d(2025, 1, 6));
        let tail = Task::new("tail", 1).with_predecessor(Dependency::finish_to_start("b"));
        let mut snap = snapshot(vec![a, b, tail], 1.0, Some(d(2025, 1, 31)));
        snap.assignments.retain(|a| a.task_id != "tail");
        let run = level(&snap, LevelingOptions::default());

        assert_eq!(run.result.remaining, 0);
        let moved: Vec<&str> = run.result.delays.iter().map(|d| d.task_id.as_str()).collect();
        assert_eq!(moved, vec!["b", "tail"]);
        assert_durations_hold(&snap, &run);
    }

    #[test]
    fn test_iteration_cap_warns() {
        let snap = snapshot(
            vec![
                make_task("a", 3, d(2025, 1, 6)),
                make_task("b", 3, d(2025, 1, 6)),
                make_task("c", 3, d(2025, 1, 6)),
            ],
            1.0,
            Some(d(2025, 3, 31)),
        );
        let calendars = CalendarSet::from_snapshot(&snap);
        let engine = CriticalPathEngine::new(&snap, &calendars).unwrap();
        let config = SolverConfig {
            max_iterations_cap: 1,
            verbosity: 0,
        };
        let options = LevelingOptions::default();
        let solver = LevelingSolver::new(&engine, &snap, &calendars, &options, &config);
        let run = solver.solve(engine.run(&FxHashMap::default()));

        assert_eq!(run.result.iterations, 1);
        assert!(run.result.remaining > 0);
        assert!(run.result.warnings[0].starts_with("IterationLimitExceeded"));
    }

    #[test]
    fn test_no_conflicts_is_a_no_op() {
        let snap = snapshot(vec![make_task("solo", 2, d(2025, 1, 6))], 1.0, None);
        let run = level(&snap, LevelingOptions::default());
        assert_eq!(run.result.iterations, 0);
        assert_eq!(run.result.outcome, SolverPhase::Resolved);
        assert!(run.result.delays.is_empty());
    }
}
