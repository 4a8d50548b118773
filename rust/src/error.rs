//! Error taxonomy for leveling requests.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::critical_path::CriticalPathError;

/// Errors that abort a leveling request before any write occurs.
///
/// Soft solver failures (conflicts left after the iteration cap) are never
/// reported through this type; they surface as warnings in a normal response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LevelingError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Circular dependency detected among tasks: {}", task_ids.join(", "))]
    CycleDetected { task_ids: Vec<String> },
    #[error("Resource {resource_id} has non-positive capacity (max_units={max_units})")]
    CapacityMisconfigured { resource_id: String, max_units: f64 },
    #[error("Leveling already in progress for project {0}")]
    Busy(Uuid),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Leveling did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Store error: {0}")]
    Store(String),
}

impl LevelingError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable code for the wire format.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::CycleDetected { .. } => "cycle_detected",
            Self::CapacityMisconfigured { .. } => "capacity_misconfigured",
            Self::Busy(_) => "busy",
            Self::InvalidInput(_) => "invalid_input",
            Self::Timeout(_) => "timeout",
            Self::Store(_) => "store_error",
        }
    }
}

impl From<CriticalPathError> for LevelingError {
    fn from(err: CriticalPathError) -> Self {
        match err {
            CriticalPathError::CycleDetected { task_ids } => Self::CycleDetected { task_ids },
            other @ CriticalPathError::MissingProjectStart { .. } => {
                Self::InvalidInput(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_tasks() {
        let err = LevelingError::CycleDetected {
            task_ids: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency detected among tasks: a, b"
        );
        assert_eq!(err.code(), "cycle_detected");
    }

    #[test]
    fn test_not_found_helper() {
        let err = LevelingError::not_found("task", "t-1");
        assert_eq!(err.to_string(), "task not found: t-1");
    }
}
