//! Core data types for the leveling engine.
//!
//! These mirror the persisted project graph. Computed schedule dates live in
//! [`crate::critical_path::TaskTiming`], not here.

use chrono::NaiveDate;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::{DEFAULT_HOURS_PER_DAY, DEFAULT_WORK_DAYS_MASK};
use crate::error::LevelingError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Task,
    Milestone,
    Summary,
}

/// Precedence relation between a predecessor and its successor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    #[default]
    #[serde(alias = "FS")]
    FinishToStart,
    #[serde(alias = "SS")]
    StartToStart,
    #[serde(alias = "FF")]
    FinishToFinish,
    #[serde(alias = "SF")]
    StartToFinish,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub predecessor_id: String,
    #[serde(default)]
    pub relation: Relation,
    /// Working days; negative values are leads.
    #[serde(default)]
    pub lag_days: i64,
}

impl Dependency {
    pub fn finish_to_start(predecessor_id: impl Into<String>) -> Self {
        Self {
            predecessor_id: predecessor_id.into(),
            relation: Relation::FinishToStart,
            lag_days: 0,
        }
    }
}

/// Date constraint kinds understood by the forward and backward passes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    #[default]
    Asap,
    Alap,
    /// Start no earlier than.
    Snet,
    /// Start no later than.
    Snlt,
    /// Finish no earlier than.
    Fnet,
    /// Finish no later than.
    Fnlt,
    /// Must start on.
    Mso,
    /// Must finish on.
    Mfo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub project_id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Working days. Ignored for milestones.
    #[serde(default)]
    pub duration_days: i64,
    #[serde(default)]
    pub planned_start: Option<NaiveDate>,
    #[serde(default)]
    pub planned_finish: Option<NaiveDate>,
    #[serde(default)]
    pub percent_complete: f64,
    /// Rank, smaller is more important. Unset ranks by snapshot order.
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub constraint_type: ConstraintType,
    #[serde(default)]
    pub constraint_date: Option<NaiveDate>,
    #[serde(default)]
    pub predecessors: Vec<Dependency>,
}

impl Task {
    pub fn new(id: impl Into<String>, duration_days: i64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            project_id: Uuid::nil(),
            task_type: TaskType::Task,
            parent_id: None,
            duration_days,
            planned_start: None,
            planned_finish: None,
            percent_complete: 0.0,
            priority: None,
            calendar_id: None,
            constraint_type: ConstraintType::Asap,
            constraint_date: None,
            predecessors: Vec::new(),
        }
    }

    pub fn milestone(id: impl Into<String>) -> Self {
        Self {
            task_type: TaskType::Milestone,
            ..Self::new(id, 0)
        }
    }

    pub fn summary(id: impl Into<String>) -> Self {
        Self {
            task_type: TaskType::Summary,
            ..Self::new(id, 0)
        }
    }

    pub fn with_planned_start(mut self, date: NaiveDate) -> Self {
        self.planned_start = Some(date);
        self
    }

    pub fn with_predecessor(mut self, dependency: Dependency) -> Self {
        self.predecessors.push(dependency);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_constraint(mut self, kind: ConstraintType, date: NaiveDate) -> Self {
        self.constraint_type = kind;
        self.constraint_date = Some(date);
        self
    }

    pub fn is_milestone(&self) -> bool {
        self.task_type == TaskType::Milestone
    }

    pub fn is_summary(&self) -> bool {
        self.task_type == TaskType::Summary
    }

    /// Duration the passes actually schedule with.
    pub fn effective_duration(&self) -> i64 {
        if self.is_milestone() {
            0
        } else {
            self.duration_days
        }
    }

    /// Started work and hard date constraints cannot be moved by leveling.
    pub fn is_pinned(&self) -> bool {
        self.percent_complete > 0.0
            || matches!(self.constraint_type, ConstraintType::Mso | ConstraintType::Mfo)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    #[default]
    Labor,
    Equipment,
    Material,
}

fn default_overtime_multiplier() -> f64 {
    1.5
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resource_type: ResourceType,
    /// Units available per working day.
    pub max_units: f64,
    #[serde(default)]
    pub cost_per_hour: f64,
    #[serde(default)]
    pub cost_per_unit: f64,
    #[serde(default = "default_overtime_multiplier")]
    pub overtime_rate_multiplier: f64,
    #[serde(default)]
    pub calendar_id: Option<String>,
}

impl Resource {
    pub fn new(id: impl Into<String>, max_units: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            resource_type: ResourceType::Labor,
            max_units,
            cost_per_hour: 0.0,
            cost_per_unit: 0.0,
            overtime_rate_multiplier: default_overtime_multiplier(),
            calendar_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: String,
    pub resource_id: String,
    pub units_assigned: f64,
    /// Fixed hours per working day, replacing units × calendar hours.
    #[serde(default)]
    pub hours_per_day: Option<f64>,
    #[serde(default)]
    pub budgeted_cost: f64,
    #[serde(default)]
    pub quantity_needed: Option<f64>,
}

impl Assignment {
    pub fn new(task_id: impl Into<String>, resource_id: impl Into<String>, units: f64) -> Self {
        Self {
            task_id: task_id.into(),
            resource_id: resource_id.into(),
            units_assigned: units,
            hours_per_day: None,
            budgeted_cost: 0.0,
            quantity_needed: None,
        }
    }
}

fn default_hours_per_day() -> f64 {
    DEFAULT_HOURS_PER_DAY
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    #[serde(default)]
    pub company_id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub planned_start: Option<NaiveDate>,
    #[serde(default)]
    pub planned_finish: Option<NaiveDate>,
    #[serde(default)]
    pub default_calendar_id: Option<String>,
    #[serde(default = "default_hours_per_day")]
    pub hours_per_day: f64,
}

impl Project {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            company_id: Uuid::nil(),
            name: String::new(),
            planned_start: None,
            planned_finish: None,
            default_calendar_id: None,
            hours_per_day: DEFAULT_HOURS_PER_DAY,
        }
    }
}

fn default_work_days_mask() -> u8 {
    DEFAULT_WORK_DAYS_MASK
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OvertimeDay {
    pub date: NaiveDate,
    pub hours: f64,
}

/// Persisted calendar definition. Bit 0 of the mask is Monday, bit 6 Sunday.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalendarSpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_work_days_mask")]
    pub work_days_mask: u8,
    /// Falls back to the project's hours per day.
    #[serde(default)]
    pub hours_per_day: Option<f64>,
    #[serde(default)]
    pub exceptions: Vec<NaiveDate>,
    #[serde(default)]
    pub overtime: Vec<OvertimeDay>,
}

/// Consistent read of one project's schedule graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project: Project,
    #[serde(default)]
    pub calendars: Vec<CalendarSpec>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

impl ProjectSnapshot {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            calendars: Vec::new(),
            tasks: Vec::new(),
            resources: Vec::new(),
            assignments: Vec::new(),
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Check structural invariants before any computation runs.
    pub fn validate(&self) -> Result<(), LevelingError> {
        if !(self.project.hours_per_day.is_finite() && self.project.hours_per_day > 0.0) {
            return Err(LevelingError::InvalidInput(format!(
                "project hours_per_day must be positive, got {}",
                self.project.hours_per_day
            )));
        }

        for calendar in &self.calendars {
            if calendar.work_days_mask & 0x7f == 0 {
                return Err(LevelingError::InvalidInput(format!(
                    "calendar {} has no working weekdays",
                    calendar.id
                )));
            }
            if let Some(hours) = calendar.hours_per_day {
                if !(hours.is_finite() && hours >= 0.0) {
                    return Err(LevelingError::InvalidInput(format!(
                        "calendar {} has invalid hours_per_day {}",
                        calendar.id, hours
                    )));
                }
            }
        }

        let mut task_ids: FxHashSet<&str> = FxHashSet::default();
        for task in &self.tasks {
            if !task_ids.insert(task.id.as_str()) {
                return Err(LevelingError::InvalidInput(format!(
                    "duplicate task id {}",
                    task.id
                )));
            }
            if task.duration_days < 0 {
                return Err(LevelingError::InvalidInput(format!(
                    "task {} has negative duration {}",
                    task.id, task.duration_days
                )));
            }
            if !(0.0..=100.0).contains(&task.percent_complete) {
                return Err(LevelingError::InvalidInput(format!(
                    "task {} has percent_complete {} outside 0..=100",
                    task.id, task.percent_complete
                )));
            }
            let needs_date = !matches!(
                task.constraint_type,
                ConstraintType::Asap | ConstraintType::Alap
            );
            if needs_date && task.constraint_date.is_none() {
                return Err(LevelingError::InvalidInput(format!(
                    "task {} has a {:?} constraint without a date",
                    task.id, task.constraint_type
                )));
            }
        }

        for task in &self.tasks {
            for dep in &task.predecessors {
                if !task_ids.contains(dep.predecessor_id.as_str()) {
                    return Err(LevelingError::not_found("task", &dep.predecessor_id));
                }
            }
        }

        let mut resource_ids: FxHashSet<&str> = FxHashSet::default();
        for resource in &self.resources {
            if !resource_ids.insert(resource.id.as_str()) {
                return Err(LevelingError::InvalidInput(format!(
                    "duplicate resource id {}",
                    resource.id
                )));
            }
        }

        for assignment in &self.assignments {
            if !task_ids.contains(assignment.task_id.as_str()) {
                return Err(LevelingError::not_found("task", &assignment.task_id));
            }
            let Some(resource) = self.resource(&assignment.resource_id) else {
                return Err(LevelingError::not_found("resource", &assignment.resource_id));
            };
            if !(resource.max_units.is_finite() && resource.max_units > 0.0) {
                return Err(LevelingError::CapacityMisconfigured {
                    resource_id: resource.id.clone(),
                    max_units: resource.max_units,
                });
            }
            if !(assignment.units_assigned.is_finite() && assignment.units_assigned > 0.0) {
                return Err(LevelingError::InvalidInput(format!(
                    "assignment of {} to {} has non-positive units {}",
                    assignment.resource_id, assignment.task_id, assignment.units_assigned
                )));
            }
            if let Some(hours) = assignment.hours_per_day {
                if !(hours.is_finite() && hours >= 0.0) {
                    return Err(LevelingError::InvalidInput(format!(
                        "assignment of {} to {} has negative hours_per_day {}",
                        assignment.resource_id, assignment.task_id, hours
                    )));
                }
            }
        }

        Ok(())
    }
}

/// New dates for one task after leveling, written back keyed by task id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDateUpdate {
    pub task_id: String,
    pub planned_start: NaiveDate,
    pub planned_finish: NaiveDate,
    pub early_start: NaiveDate,
    pub early_finish: NaiveDate,
}
