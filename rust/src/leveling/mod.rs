//! Resource leveling.
//!
//! Resolves over-allocations by delaying task starts one working day at a
//! time. Each move is expressed as a start floor fed back into the critical
//! path engine, so successors are pushed by precedence and float is
//! always current when the next candidate is chosen.

mod selection;
mod solver;
mod state;

use chrono::NaiveDate;
use serde::Serialize;

pub use selection::{select_candidate, CandidateKey, Selection, SelectionContext};
pub use solver::{LevelingRun, LevelingSolver};
pub use state::{LevelingState, SolverPhase};

/// Net start change of one task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LevelingDelay {
    pub task_id: String,
    pub original_start: NaiveDate,
    pub new_start: NaiveDate,
    /// Working days on the task's calendar.
    pub delay_days: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LevelingResult {
    pub delays: Vec<LevelingDelay>,
    pub resolved: usize,
    pub remaining: usize,
    pub iterations: usize,
    pub warnings: Vec<String>,
    pub outcome: SolverPhase,
}
