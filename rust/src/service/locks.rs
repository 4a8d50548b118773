//! Per-project advisory locks.

use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::LevelingError;

/// Projects with a leveling run in flight. A second request for the same
/// project fails fast with `Busy`; other projects are unaffected.
#[derive(Clone, Debug, Default)]
pub struct ProjectLocks {
    held: Arc<DashMap<Uuid, Instant>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, project_id: Uuid) -> Result<ProjectLockGuard, LevelingError> {
        match self.held.entry(project_id) {
            Entry::Occupied(_) => Err(LevelingError::Busy(project_id)),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Ok(ProjectLockGuard {
                    held: Arc::clone(&self.held),
                    project_id,
                })
            }
        }
    }

    pub fn is_held(&self, project_id: Uuid) -> bool {
        self.held.contains_key(&project_id)
    }
}

/// Releases the project on drop.
#[derive(Debug)]
pub struct ProjectLockGuard {
    held: Arc<DashMap<Uuid, Instant>>,
    project_id: Uuid,
}

impl Drop for ProjectLockGuard {
    fn drop(&mut self) {
        if let Some((_, acquired)) = self.held.remove(&self.project_id) {
            tracing::debug!(
                project_id = %self.project_id,
                held_ms = acquired.elapsed().as_millis() as u64,
                "released project lock"
            );
        }
    }
}
