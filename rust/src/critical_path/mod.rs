//! Critical path method over a project snapshot.
//!
//! Builds the precedence graph (rejecting cycles), runs the forward and
//! backward passes on working-day calendars and derives total/free float.
//! Summary tasks are rolled up from their children afterwards.

mod calculation;
mod graph;
mod types;

pub use calculation::{calculate_critical_path, CriticalPathEngine};
pub use graph::{Edge, ProjectGraph, TaskIdx};
pub use types::{CriticalPathError, CriticalPathResult, SummaryRollup, TaskTiming};
