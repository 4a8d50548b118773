//! Critical path calculation using forward and backward passes.

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::calendar::{CalendarSet, WorkCalendar};
use crate::log_debug;
use crate::models::{ConstraintType, ProjectSnapshot, Relation, Task};

use super::graph::ProjectGraph;
use super::types::{CriticalPathError, CriticalPathResult, SummaryRollup, TaskTiming};

/// Forward/backward pass engine over one snapshot.
///
/// The graph and topological order are built once in [`new`](Self::new).
/// [`run`](Self::run) is then a pure function of the per-task start floors,
/// so the leveling solver can re-run it after every move.
pub struct CriticalPathEngine<'a> {
    snapshot: &'a ProjectSnapshot,
    calendars: &'a CalendarSet,
    graph: ProjectGraph,
    /// Scheduled tasks indexed like the graph.
    tasks: Vec<&'a Task>,
    project_start: Option<NaiveDate>,
    verbosity: u8,
}

impl<'a> CriticalPathEngine<'a> {
    pub fn new(
        snapshot: &'a ProjectSnapshot,
        calendars: &'a CalendarSet,
    ) -> Result<Self, CriticalPathError> {
        let graph = ProjectGraph::build(&snapshot.tasks)?;
        let by_id: FxHashMap<&str, &Task> =
            snapshot.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let tasks: Vec<&Task> = graph
            .ids()
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect();

        let roots: Vec<&Task> = (0..tasks.len())
            .filter(|&i| graph.predecessors(i as u32).is_empty())
            .map(|i| tasks[i])
            .collect();
        let project_start = snapshot
            .project
            .planned_start
            .or_else(|| roots.iter().filter_map(|t| t.planned_start).min());
        if project_start.is_none() {
            if let Some(task) = roots.iter().find(|t| t.planned_start.is_none()) {
                return Err(CriticalPathError::MissingProjectStart {
                    task_id: task.id.clone(),
                });
            }
        }

        Ok(Self {
            snapshot,
            calendars,
            graph,
            tasks,
            project_start,
            verbosity: 0,
        })
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn graph(&self) -> &ProjectGraph {
        &self.graph
    }

    /// Number of scheduled (non-summary) tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn calendar_for(&self, task: &Task) -> &WorkCalendar {
        self.calendars.resolve(task.calendar_id.as_deref())
    }

    /// Run both passes. `floors` holds the earliest start each task may take.
    pub fn run(&self, floors: &FxHashMap<String, NaiveDate>) -> CriticalPathResult {
        let n = self.tasks.len();
        if n == 0 {
            return CriticalPathResult {
                project_start: self.project_start,
                project_finish: self.snapshot.project.planned_finish,
                ..Default::default()
            };
        }

        // Forward pass
        let mut es: Vec<NaiveDate> = vec![NaiveDate::default(); n];
        let mut ef: Vec<NaiveDate> = vec![NaiveDate::default(); n];
        for &idx in self.graph.order() {
            let i = idx as usize;
            let task = self.tasks[i];
            let cal = self.calendar_for(task);
            let duration = task.effective_duration();

            let mut start: Option<NaiveDate> = None;
            for edge in self.graph.predecessors(idx) {
                let p = edge.task as usize;
                let candidate = match edge.relation {
                    Relation::FinishToStart => cal.add_work_days(ef[p], edge.lag_days),
                    Relation::StartToStart => cal.add_work_days(es[p], edge.lag_days),
                    Relation::FinishToFinish => cal
                        .subtract_work_days(cal.add_work_days(ef[p], edge.lag_days), duration),
                    Relation::StartToFinish => cal
                        .subtract_work_days(cal.add_work_days(es[p], edge.lag_days), duration),
                };
                start = Some(start.map_or(candidate, |s| s.max(candidate)));
            }

            let mut start = start
                .or(task.planned_start)
                .or(self.project_start)
                .unwrap_or_default();
            // FF and SF links can back-compute a start before the project opens.
            if let Some(project_start) = self.project_start {
                start = start.max(project_start);
            }
            if let Some(planned) = task.planned_start {
                start = start.max(planned);
            }
            if let Some(&floor) = floors.get(&task.id) {
                start = start.max(floor);
            }
            start = apply_forward_constraint(task, start, duration, cal);
            start = cal.next_work_day_on_or_after(start);

            es[i] = start;
            ef[i] = if duration == 0 {
                start
            } else {
                cal.add_work_days(start, duration)
            };
            log_debug!(
                self.verbosity,
                "forward {}: es={} ef={}",
                task.id,
                es[i],
                ef[i]
            );
        }

        let max_ef = ef.iter().copied().max().unwrap_or_default();
        let project_finish = match self.snapshot.project.planned_finish {
            Some(planned) => planned.max(max_ef),
            None => max_ef,
        };

        // Backward pass
        let mut ls: Vec<NaiveDate> = vec![NaiveDate::default(); n];
        let mut lf: Vec<NaiveDate> = vec![NaiveDate::default(); n];
        for &idx in self.graph.order().iter().rev() {
            let i = idx as usize;
            let task = self.tasks[i];
            let cal = self.calendar_for(task);
            let duration = task.effective_duration();

            let mut finish: Option<NaiveDate> = None;
            for edge in self.graph.successors(idx) {
                let s = edge.task as usize;
                let candidate = match edge.relation {
                    Relation::FinishToStart => cal.subtract_work_days(ls[s], edge.lag_days),
                    Relation::StartToStart => cal
                        .add_work_days(cal.subtract_work_days(ls[s], edge.lag_days), duration),
                    Relation::FinishToFinish => cal.subtract_work_days(lf[s], edge.lag_days),
                    Relation::StartToFinish => cal
                        .add_work_days(cal.subtract_work_days(lf[s], edge.lag_days), duration),
                };
                finish = Some(finish.map_or(candidate, |f| f.min(candidate)));
            }

            // SS and SF successors can imply a finish past the project's.
            let finish = finish.map_or(project_finish, |f| f.min(project_finish));
            let finish = apply_backward_constraint(
                task,
                finish,
                duration,
                cal,
            );
            lf[i] = finish;
            ls[i] = if duration == 0 {
                finish
            } else {
                cal.subtract_work_days(finish, duration)
            };
        }

        // Float
        let mut timings: FxHashMap<String, TaskTiming> =
            FxHashMap::with_capacity_and_hasher(n, Default::default());
        for (i, task) in self.tasks.iter().enumerate() {
            let cal = self.calendar_for(task);
            let total_float = cal.work_days_between(es[i], ls[i]);
            let free_float = self
                .graph
                .successors(i as u32)
                .iter()
                .map(|e| es[e.task as usize])
                .min()
                .map_or(total_float, |next| cal.work_days_between(ef[i], next).max(0));
            timings.insert(
                task.id.clone(),
                TaskTiming {
                    early_start: es[i],
                    early_finish: ef[i],
                    late_start: ls[i],
                    late_finish: lf[i],
                    total_float,
                    free_float,
                    is_critical: total_float <= 0,
                },
            );
        }

        let order: Vec<String> = self
            .graph
            .order()
            .iter()
            .map(|&idx| self.tasks[idx as usize].id.clone())
            .collect();
        let summaries = self.roll_up_summaries(&timings);

        CriticalPathResult {
            timings,
            summaries,
            order,
            project_start: self.project_start.or_else(|| es.iter().copied().min()),
            project_finish: Some(project_finish),
        }
    }

    fn roll_up_summaries(
        &self,
        timings: &FxHashMap<String, TaskTiming>,
    ) -> FxHashMap<String, SummaryRollup> {
        let mut children: FxHashMap<&str, Vec<&Task>> = FxHashMap::default();
        for task in &self.snapshot.tasks {
            if let Some(parent) = task.parent_id.as_deref() {
                children.entry(parent).or_default().push(task);
            }
        }

        let cal = self.calendars.default_calendar();
        let mut summaries = FxHashMap::default();
        for task in self.snapshot.tasks.iter().filter(|t| t.is_summary()) {
            let mut visiting = FxHashSet::default();
            let Some(acc) = accumulate(task, &children, timings, &mut visiting) else {
                continue;
            };
            let total_float = cal.work_days_between(acc.early_start, acc.late_start);
            summaries.insert(
                task.id.clone(),
                SummaryRollup {
                    timing: TaskTiming {
                        early_start: acc.early_start,
                        early_finish: acc.early_finish,
                        late_start: acc.late_start,
                        late_finish: acc.late_finish,
                        total_float,
                        free_float: total_float,
                        is_critical: acc.critical,
                    },
                    duration_days: cal.work_days_between(acc.early_start, acc.early_finish),
                    percent_complete: if acc.weight > 0.0 {
                        acc.weighted_complete / acc.weight
                    } else {
                        0.0
                    },
                },
            );
        }
        summaries
    }
}

/// Convenience wrapper: build an engine and run it without floors.
pub fn calculate_critical_path(
    snapshot: &ProjectSnapshot,
    calendars: &CalendarSet,
) -> Result<CriticalPathResult, CriticalPathError> {
    Ok(CriticalPathEngine::new(snapshot, calendars)?.run(&FxHashMap::default()))
}

fn apply_forward_constraint(
    task: &Task,
    es: NaiveDate,
    duration: i64,
    cal: &WorkCalendar,
) -> NaiveDate {
    let Some(cd) = task.constraint_date else {
        return es;
    };
    match task.constraint_type {
        ConstraintType::Snet => es.max(cd),
        ConstraintType::Snlt => es.min(cd),
        ConstraintType::Fnet => es.max(cal.subtract_work_days(cd, duration)),
        ConstraintType::Fnlt => es.min(cal.subtract_work_days(cd, duration)),
        ConstraintType::Mso => cd,
        ConstraintType::Mfo => cal.subtract_work_days(cd, duration),
        ConstraintType::Asap | ConstraintType::Alap => es,
    }
}

fn apply_backward_constraint(
    task: &Task,
    lf: NaiveDate,
    duration: i64,
    cal: &WorkCalendar,
) -> NaiveDate {
    let Some(cd) = task.constraint_date else {
        return lf;
    };
    match task.constraint_type {
        ConstraintType::Fnlt => lf.min(cd),
        ConstraintType::Fnet => lf.max(cd),
        ConstraintType::Snlt => lf.min(cal.add_work_days(cd, duration)),
        ConstraintType::Snet => lf.max(cal.add_work_days(cd, duration)),
        ConstraintType::Mfo => cd,
        ConstraintType::Mso => cal.add_work_days(cd, duration),
        ConstraintType::Asap | ConstraintType::Alap => lf,
    }
}

struct RollupAcc {
    early_start: NaiveDate,
    early_finish: NaiveDate,
    late_start: NaiveDate,
    late_finish: NaiveDate,
    critical: bool,
    weighted_complete: f64,
    weight: f64,
}

impl RollupAcc {
    fn merge(&mut self, other: RollupAcc) {
        self.early_start = self.early_start.min(other.early_start);
        self.early_finish = self.early_finish.max(other.early_finish);
        self.late_start = self.late_start.min(other.late_start);
        self.late_finish = self.late_finish.max(other.late_finish);
        self.critical |= other.critical;
        self.weighted_complete += other.weighted_complete;
        self.weight += other.weight;
    }
}

fn accumulate<'t>(
    summary: &'t Task,
    children: &FxHashMap<&str, Vec<&'t Task>>,
    timings: &FxHashMap<String, TaskTiming>,
    visiting: &mut FxHashSet<&'t str>,
) -> Option<RollupAcc> {
    if !visiting.insert(summary.id.as_str()) {
        return None;
    }
    let mut acc: Option<RollupAcc> = None;
    for child in children.get(summary.id.as_str()).into_iter().flatten() {
        let part = if child.is_summary() {
            accumulate(child, children, timings, visiting)
        } else {
            timings.get(&child.id).map(|t| {
                let weight = child.effective_duration() as f64;
                RollupAcc {
                    early_start: t.early_start,
                    early_finish: t.early_finish,
                    late_start: t.late_start,
                    late_finish: t.late_finish,
                    critical: t.is_critical,
                    weighted_complete: child.percent_complete * weight,
                    weight,
                }
            })
        };
        if let Some(part) = part {
            match acc.as_mut() {
                Some(existing) => existing.merge(part),
                None => acc = Some(part),
            }
        }
    }
    acc
}
