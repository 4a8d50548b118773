//! Mutable solver bookkeeping.

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::overallocation::OverAllocation;

/// Solver lifecycle. The last three are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverPhase {
    Analyzing,
    Resolving,
    Resolved,
    PartiallyResolved,
    Unresolvable,
}

impl SolverPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::PartiallyResolved | Self::Unresolvable
        )
    }
}

type ConflictKey = (String, NaiveDate);

fn key_of(conflict: &OverAllocation) -> ConflictKey {
    (conflict.resource_id.clone(), conflict.date)
}

#[derive(Clone, Debug)]
pub struct LevelingState {
    pub phase: SolverPhase,
    /// Earliest start per delayed task, fed back into the critical path engine.
    pub floors: FxHashMap<String, NaiveDate>,
    pub iterations: usize,
    pub moves: usize,
    pub warnings: Vec<String>,
    /// Conflicts given up on, with the contributor set seen at the time.
    unresolvable: FxHashMap<ConflictKey, Vec<String>>,
    reasons: FxHashMap<ConflictKey, String>,
    warned: FxHashSet<ConflictKey>,
    frozen: FxHashSet<String>,
}

impl Default for LevelingState {
    fn default() -> Self {
        Self {
            phase: SolverPhase::Analyzing,
            floors: FxHashMap::default(),
            iterations: 0,
            moves: 0,
            warnings: Vec::new(),
            unresolvable: FxHashMap::default(),
            reasons: FxHashMap::default(),
            warned: FxHashSet::default(),
            frozen: FxHashSet::default(),
        }
    }
}

impl LevelingState {
    /// Marked and still blocked by the same contributors.
    pub fn is_marked(&self, conflict: &OverAllocation) -> bool {
        self.unresolvable
            .get(&key_of(conflict))
            .is_some_and(|ids| *ids == conflict.conflicting_task_ids)
    }

    pub fn mark_unresolvable(&mut self, conflict: &OverAllocation, reason: String) {
        let key = key_of(conflict);
        self.unresolvable
            .insert(key.clone(), conflict.conflicting_task_ids.clone());
        self.reasons.insert(key, reason);
    }

    /// Why the solver last gave up on this resource-day, if it did.
    pub fn reason(&self, conflict: &OverAllocation) -> Option<&str> {
        self.reasons.get(&key_of(conflict)).map(String::as_str)
    }

    /// Record `message` unless this resource-day already has a warning.
    pub fn warn_once(&mut self, conflict: &OverAllocation, message: String) {
        if self.warned.insert(key_of(conflict)) {
            tracing::warn!(
                resource_id = %conflict.resource_id,
                date = %conflict.date,
                "{}",
                message
            );
            self.warnings.push(message);
        }
    }

    pub fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn freeze(&mut self, task_id: &str) {
        self.frozen.insert(task_id.to_string());
    }

    pub fn frozen(&self) -> &FxHashSet<String> {
        &self.frozen
    }

    /// Set a floor, returning the previous one.
    pub fn set_floor(&mut self, task_id: &str, date: NaiveDate) -> Option<NaiveDate> {
        self.floors.insert(task_id.to_string(), date)
    }

    pub fn restore_floor(&mut self, task_id: &str, previous: Option<NaiveDate>) {
        match previous {
            Some(date) => {
                self.floors.insert(task_id.to_string(), date);
            }
            None => {
                self.floors.remove(task_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(ids: &[&str]) -> OverAllocation {
        OverAllocation {
            resource_id: "crew".to_string(),
            resource_name: "Crew".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            allocated_hours: 16.0,
            capacity: 8.0,
            excess_hours: 8.0,
            conflicting_task_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_mark_expires_when_contributors_change() {
        let mut state = LevelingState::default();
        state.mark_unresolvable(&conflict(&["a", "b"]), "stuck".to_string());
        assert!(state.is_marked(&conflict(&["a", "b"])));
        assert_eq!(state.reason(&conflict(&["a", "c"])), Some("stuck"));
        assert!(!state.is_marked(&conflict(&["a", "c"])));
    }

    #[test]
    fn test_warn_once_per_resource_day() {
        let mut state = LevelingState::default();
        state.warn_once(&conflict(&["a"]), "first".to_string());
        state.warn_once(&conflict(&["a", "b"]), "second".to_string());
        assert_eq!(state.warnings, vec!["first".to_string()]);
    }

    #[test]
    fn test_floor_restore() {
        let mut state = LevelingState::default();
        let date = NaiveDate::from_ymd_opt(2025, 1, 7).unwrap();
        let previous = state.set_floor("a", date);
        assert_eq!(previous, None);
        state.restore_floor("a", previous);
        assert!(state.floors.is_empty());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(!SolverPhase::Resolving.is_terminal());
        assert!(SolverPhase::PartiallyResolved.is_terminal());
    }
}
