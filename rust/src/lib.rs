//! Resource leveling for project schedules.
//!
//! Computes the critical path over working-day calendars, builds per-resource
//! demand histograms, detects over-allocations and resolves them by delaying
//! non-critical tasks. Exposed as an HTTP service (`http`, `service`) and,
//! with the `python` feature, as a Python extension module.

pub mod calendar;
pub mod config;
pub mod critical_path;
pub mod error;
pub mod histogram;
pub mod http;
pub mod leveling;
pub mod logging;
pub mod models;
pub mod overallocation;
pub mod pipeline;
pub mod service;

#[cfg(feature = "python")]
mod python;

pub use calendar::{CalendarSet, WorkCalendar};
pub use config::{LevelingOptions, LevelingOrder, ServerConfig, SolverConfig};
pub use critical_path::{calculate_critical_path, CriticalPathEngine, CriticalPathResult, TaskTiming};
pub use error::LevelingError;
pub use histogram::{DailyUsage, DemandHistogram};
pub use leveling::{LevelingDelay, LevelingResult, LevelingSolver};
pub use models::{
    Assignment, ConstraintType, Dependency, Project, ProjectSnapshot, Relation, Resource, Task,
    TaskDateUpdate,
};
pub use overallocation::{detect_over_allocations, OverAllocation};
pub use pipeline::{analyze_snapshot, ScheduleAnalysis};
