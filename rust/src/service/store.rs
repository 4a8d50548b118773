//! Persistence boundary.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::LevelingError;
use crate::models::{ProjectSnapshot, TaskDateUpdate};

/// Audit entry appended after a leveling run changes the schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleChange {
    pub project_id: Uuid,
    pub company_id: Uuid,
    pub changed_by: String,
    pub source: String,
    pub notes: String,
    pub task_ids: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

/// The project graph's owner. The engine only reads snapshots and writes
/// back moved task dates.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Company owning `project_id`, or `NotFound`.
    async fn project_owner(&self, project_id: Uuid) -> Result<Uuid, LevelingError>;

    async fn load_snapshot(&self, project_id: Uuid) -> Result<ProjectSnapshot, LevelingError>;

    async fn update_task_dates(
        &self,
        project_id: Uuid,
        update: &TaskDateUpdate,
    ) -> Result<(), LevelingError>;

    async fn record_change(&self, change: ScheduleChange) -> Result<(), LevelingError>;
}

/// Store backed by process memory, used by tests and the demo server.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    projects: RwLock<FxHashMap<Uuid, ProjectSnapshot>>,
    changes: RwLock<Vec<ScheduleChange>>,
    task_writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshots(snapshots: impl IntoIterator<Item = ProjectSnapshot>) -> Self {
        let projects = snapshots
            .into_iter()
            .map(|snap| (snap.project.id, snap))
            .collect();
        Self {
            projects: RwLock::new(projects),
            ..Self::default()
        }
    }

    pub async fn insert(&self, snapshot: ProjectSnapshot) {
        self.projects
            .write()
            .await
            .insert(snapshot.project.id, snapshot);
    }

    pub async fn snapshot(&self, project_id: Uuid) -> Option<ProjectSnapshot> {
        self.projects.read().await.get(&project_id).cloned()
    }

    pub async fn changes(&self) -> Vec<ScheduleChange> {
        self.changes.read().await.clone()
    }

    /// Number of task updates applied so far.
    pub fn task_writes(&self) -> usize {
        self.task_writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn project_owner(&self, project_id: Uuid) -> Result<Uuid, LevelingError> {
        self.projects
            .read()
            .await
            .get(&project_id)
            .map(|snap| snap.project.company_id)
            .ok_or_else(|| LevelingError::not_found("project", project_id.to_string()))
    }

    async fn load_snapshot(&self, project_id: Uuid) -> Result<ProjectSnapshot, LevelingError> {
        self.snapshot(project_id)
            .await
            .ok_or_else(|| LevelingError::not_found("project", project_id.to_string()))
    }

    async fn update_task_dates(
        &self,
        project_id: Uuid,
        update: &TaskDateUpdate,
    ) -> Result<(), LevelingError> {
        let mut projects = self.projects.write().await;
        let snapshot = projects
            .get_mut(&project_id)
            .ok_or_else(|| LevelingError::not_found("project", project_id.to_string()))?;
        let task = snapshot
            .tasks
            .iter_mut()
            .find(|t| t.id == update.task_id)
            .ok_or_else(|| LevelingError::not_found("task", &update.task_id))?;
        task.planned_start = Some(update.planned_start);
        task.planned_finish = Some(update.planned_finish);
        self.task_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn record_change(&self, change: ScheduleChange) -> Result<(), LevelingError> {
        self.changes.write().await.push(change);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Project, Task};
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn test_update_applies_planned_dates() {
        let project_id = Uuid::new_v4();
        let mut snap = ProjectSnapshot::new(Project::new(project_id));
        snap.tasks.push(Task::new("a", 2));
        let store = InMemoryStore::with_snapshots([snap]);

        store
            .update_task_dates(
                project_id,
                &TaskDateUpdate {
                    task_id: "a".to_string(),
                    planned_start: d(2025, 1, 7),
                    planned_finish: d(2025, 1, 9),
                    early_start: d(2025, 1, 7),
                    early_finish: d(2025, 1, 9),
                },
            )
            .await
            .unwrap();

        let snap = store.load_snapshot(project_id).await.unwrap();
        assert_eq!(snap.tasks[0].planned_start, Some(d(2025, 1, 7)));
        assert_eq!(store.task_writes(), 1);
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let store = InMemoryStore::new();
        let err = store.project_owner(Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, LevelingError::NotFound { entity: "project", .. }));
    }
}
