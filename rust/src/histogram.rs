//! Per-resource daily demand.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::calendar::CalendarSet;
use crate::critical_path::CriticalPathResult;
use crate::models::{Assignment, ProjectSnapshot, Resource, Task};

/// Tolerance for comparing summed hours against capacity.
pub const HOURS_EPSILON: f64 = 1e-9;

/// Dates a task occupies: working days in `[start, finish)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: NaiveDate,
    pub finish: NaiveDate,
}

/// Windows from computed early dates. Tasks the schedule has no timing for
/// fall back to their planned dates.
pub fn windows_from_schedule(
    snapshot: &ProjectSnapshot,
    schedule: &CriticalPathResult,
) -> FxHashMap<String, ActiveWindow> {
    let mut windows = windows_from_plan(snapshot);
    windows.extend(schedule.timings.iter().map(|(id, t)| {
        (
            id.clone(),
            ActiveWindow {
                start: t.early_start,
                finish: t.early_finish,
            },
        )
    }));
    windows
}

/// Windows from planned dates, for tasks that have both.
pub fn windows_from_plan(snapshot: &ProjectSnapshot) -> FxHashMap<String, ActiveWindow> {
    snapshot
        .tasks
        .iter()
        .filter_map(|t| match (t.planned_start, t.planned_finish) {
            (Some(start), Some(finish)) => Some((t.id.clone(), ActiveWindow { start, finish })),
            _ => None,
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DayLoad {
    pub hours: f64,
    pub capacity: f64,
    /// `(task_id, hours)` in the order assignments were read.
    pub contributions: Vec<(String, f64)>,
}

impl DayLoad {
    pub fn is_over_allocated(&self) -> bool {
        self.hours > self.capacity + HOURS_EPSILON
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResourceLoad {
    pub resource_id: String,
    pub resource_name: String,
    pub days: BTreeMap<NaiveDate, DayLoad>,
}

/// Wire form of one histogram bar.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub hours: f64,
    pub capacity: f64,
    pub over_allocated: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DemandHistogram {
    resources: Vec<ResourceLoad>,
}

impl DemandHistogram {
    /// Compute demand for every resource, one rayon task per resource.
    ///
    /// Milestones, summaries and tasks without a window contribute nothing.
    pub fn build(
        snapshot: &ProjectSnapshot,
        calendars: &CalendarSet,
        windows: &FxHashMap<String, ActiveWindow>,
    ) -> Self {
        let tasks: FxHashMap<&str, &Task> =
            snapshot.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut by_resource: FxHashMap<&str, Vec<&Assignment>> = FxHashMap::default();
        for assignment in &snapshot.assignments {
            by_resource
                .entry(assignment.resource_id.as_str())
                .or_default()
                .push(assignment);
        }

        let resources = snapshot
            .resources
            .par_iter()
            .map(|resource| {
                let assignments = by_resource
                    .get(resource.id.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                resource_load(resource, assignments, &tasks, calendars, windows)
            })
            .collect();

        Self { resources }
    }

    pub fn resources(&self) -> &[ResourceLoad] {
        &self.resources
    }

    pub fn resource(&self, resource_id: &str) -> Option<&ResourceLoad> {
        self.resources.iter().find(|r| r.resource_id == resource_id)
    }

    /// Resources with at least one active day, keyed by id.
    pub fn daily_usage(&self) -> BTreeMap<String, Vec<DailyUsage>> {
        self.resources
            .iter()
            .filter(|r| !r.days.is_empty())
            .map(|r| {
                let days = r
                    .days
                    .iter()
                    .map(|(&date, load)| DailyUsage {
                        date,
                        hours: load.hours,
                        capacity: load.capacity,
                        over_allocated: load.is_over_allocated(),
                    })
                    .collect();
                (r.resource_id.clone(), days)
            })
            .collect()
    }
}

fn resource_load(
    resource: &Resource,
    assignments: &[&Assignment],
    tasks: &FxHashMap<&str, &Task>,
    calendars: &CalendarSet,
    windows: &FxHashMap<String, ActiveWindow>,
) -> ResourceLoad {
    let resource_calendar = calendars.resolve(resource.calendar_id.as_deref());
    let mut days: BTreeMap<NaiveDate, DayLoad> = BTreeMap::new();

    for assignment in assignments {
        let Some(task) = tasks.get(assignment.task_id.as_str()) else {
            continue;
        };
        if task.is_milestone() || task.is_summary() {
            continue;
        }
        let Some(window) = windows.get(&task.id) else {
            continue;
        };
        let task_calendar = calendars.resolve(task.calendar_id.as_deref());
        for date in task_calendar.work_dates(window.start, window.finish) {
            let available = resource_calendar.working_hours(date);
            let hours = assignment
                .hours_per_day
                .unwrap_or(assignment.units_assigned * available);
            if hours <= 0.0 {
                continue;
            }
            let day = days.entry(date).or_insert_with(|| DayLoad {
                capacity: resource.max_units * available,
                ..Default::default()
            });
            day.hours += hours;
            day.contributions.push((task.id.clone(), hours));
        }
    }

    ResourceLoad {
        resource_id: resource.id.clone(),
        resource_name: resource.name.clone(),
        days,
    }
}
