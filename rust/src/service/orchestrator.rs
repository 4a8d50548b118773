//! Request orchestration: auth, locking, pipeline, write-back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{LevelingOptions, SolverConfig};
use crate::error::LevelingError;
use crate::histogram::DailyUsage;
use crate::leveling::LevelingResult;
use crate::overallocation::OverAllocation;
use crate::pipeline::{analyze_snapshot, ScheduleAnalysis};

use super::auth::AuthService;
use super::locks::ProjectLocks;
use super::store::{ScheduleChange, ScheduleStore};

pub const CHANGE_SOURCE: &str = "resource_level";

fn default_level() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelRequest {
    pub project_id: Uuid,
    #[serde(default)]
    pub options: LevelingOptions,
    /// Analyze only when false.
    #[serde(default = "default_level")]
    pub level: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LevelResponse {
    pub success: bool,
    pub project_id: Uuid,
    pub over_allocations: Vec<OverAllocation>,
    pub over_allocation_count: usize,
    pub leveling: Option<LevelingResult>,
    pub histogram: BTreeMap<String, Vec<DailyUsage>>,
    pub warnings: Vec<String>,
}

impl LevelResponse {
    fn from_analysis(project_id: Uuid, analysis: ScheduleAnalysis) -> Self {
        let histogram = analysis.histogram.daily_usage();
        Self {
            success: true,
            project_id,
            over_allocation_count: analysis.over_allocations.len(),
            over_allocations: analysis.over_allocations,
            leveling: analysis.leveling,
            histogram,
            warnings: analysis.warnings,
        }
    }
}

/// Serves leveling requests against an injected store and auth provider.
pub struct LevelingService {
    store: Arc<dyn ScheduleStore>,
    auth: Arc<dyn AuthService>,
    locks: ProjectLocks,
    solver: SolverConfig,
    timeout: Duration,
}

impl LevelingService {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        auth: Arc<dyn AuthService>,
        solver: SolverConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            auth,
            locks: ProjectLocks::new(),
            solver,
            timeout,
        }
    }

    pub fn locks(&self) -> &ProjectLocks {
        &self.locks
    }

    #[tracing::instrument(skip(self, bearer_token, request), fields(project_id = %request.project_id, level = request.level))]
    pub async fn level(
        &self,
        bearer_token: &str,
        request: LevelRequest,
    ) -> Result<LevelResponse, LevelingError> {
        let principal = self.auth.authenticate(bearer_token).await?;
        let owner = self.store.project_owner(request.project_id).await?;
        if owner != principal.company_id {
            // Other companies' projects are indistinguishable from missing ones.
            return Err(LevelingError::not_found(
                "project",
                request.project_id.to_string(),
            ));
        }

        let _guard = self.locks.try_acquire(request.project_id)?;
        let snapshot = self.store.load_snapshot(request.project_id).await?;

        let options = request.options.clone();
        let level = request.level;
        let solver = self.solver.clone();
        let job = tokio::task::spawn_blocking(move || {
            analyze_snapshot(&snapshot, &options, level, &solver)
        });
        let analysis = match tokio::time::timeout(self.timeout, job).await {
            Err(_) => return Err(LevelingError::Timeout(self.timeout)),
            Ok(Err(join_err)) => {
                return Err(LevelingError::Store(format!(
                    "leveling worker failed: {}",
                    join_err
                )))
            }
            Ok(Ok(result)) => result?,
        };

        if level && !analysis.updates.is_empty() {
            let mut written: Vec<&str> = Vec::with_capacity(analysis.updates.len());
            for update in &analysis.updates {
                if let Err(err) = self
                    .store
                    .update_task_dates(request.project_id, update)
                    .await
                {
                    if written.is_empty() {
                        return Err(err);
                    }
                    tracing::error!(
                        written = ?written,
                        failed = %update.task_id,
                        "write-back stopped partway: {}",
                        err
                    );
                    return Err(LevelingError::Store(format!(
                        "{}; tasks already written: {}",
                        err,
                        written.join(", ")
                    )));
                }
                written.push(update.task_id.as_str());
            }
            let resolved = analysis.leveling.as_ref().map_or(0, |l| l.resolved);
            let iterations = analysis.leveling.as_ref().map_or(0, |l| l.iterations);
            self.store
                .record_change(ScheduleChange {
                    project_id: request.project_id,
                    company_id: principal.company_id,
                    changed_by: principal.subject.clone(),
                    source: CHANGE_SOURCE.to_string(),
                    notes: format!(
                        "Resource leveling: {} tasks delayed, {} conflicts resolved in {} iterations",
                        analysis.updates.len(),
                        resolved,
                        iterations
                    ),
                    task_ids: analysis.updates.iter().map(|u| u.task_id.clone()).collect(),
                    recorded_at: Utc::now(),
                })
                .await?;
            tracing::info!(
                tasks_written = analysis.updates.len(),
                "wrote leveled schedule"
            );
        }

        Ok(LevelResponse::from_analysis(request.project_id, analysis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Assignment, Project, ProjectSnapshot, Resource, Task};
    use crate::service::auth::StaticTokenAuth;
    use crate::service::store::InMemoryStore;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn setup() -> (Arc<InMemoryStore>, LevelingService, Uuid) {
        let company = Uuid::new_v4();
        let mut project = Project::new(Uuid::new_v4());
        project.company_id = company;
        project.planned_start = Some(d(2025, 1, 6));
        project.planned_finish = Some(d(2025, 3, 31));
        let project_id = project.id;
        let mut snap = ProjectSnapshot::new(project);
        snap.tasks.push(Task::new("A", 3).with_planned_start(d(2025, 1, 6)));
        snap.tasks.push(Task::new("B", 3).with_planned_start(d(2025, 1, 7)));
        snap.tasks.push(Task::new("C", 3).with_planned_start(d(2025, 1, 8)));
        snap.resources.push(Resource::new("crew", 2.0));
        for id in ["A", "B", "C"] {
            snap.assignments.push(Assignment::new(id, "crew", 1.0));
        }

        let store = Arc::new(InMemoryStore::with_snapshots([snap]));
        let auth = StaticTokenAuth::default().with_token("good", "planner", company);
        let service = LevelingService::new(
            store.clone(),
            Arc::new(auth),
            SolverConfig::default(),
            Duration::from_secs(10),
        );
        (store, service, project_id)
    }

    fn request(project_id: Uuid, level: bool) -> LevelRequest {
        LevelRequest {
            project_id,
            options: LevelingOptions::default(),
            level,
        }
    }

    #[tokio::test]
    async fn test_level_writes_back_and_audits() {
        let (store, service, project_id) = setup();
        let response = service.level("good", request(project_id, true)).await.unwrap();

        let leveling = response.leveling.unwrap();
        assert_eq!(leveling.delays.len(), 1);
        assert_eq!(leveling.delays[0].task_id, "C");
        assert_eq!(leveling.remaining, 0);
        assert_eq!(response.over_allocation_count, 1);
        assert_eq!(response.over_allocations[0].date, d(2025, 1, 8));
        assert!(!response.histogram["crew"].iter().any(|u| u.over_allocated));
        assert_eq!(store.task_writes(), 1);

        let snap = store.snapshot(project_id).await.unwrap();
        assert_eq!(snap.task("C").unwrap().planned_start, Some(d(2025, 1, 9)));
        let changes = store.changes().await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].source, CHANGE_SOURCE);
        assert_eq!(changes[0].task_ids, vec!["C".to_string()]);
        assert!(!service.locks().is_held(project_id));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let (store, service, project_id) = setup();
        service.level("good", request(project_id, true)).await.unwrap();
        let again = service.level("good", request(project_id, true)).await.unwrap();
        assert!(again.leveling.unwrap().delays.is_empty());
        assert_eq!(store.task_writes(), 1);
        assert_eq!(store.changes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_analyze_only_does_not_write() {
        let (store, service, project_id) = setup();
        let response = service.level("good", request(project_id, false)).await.unwrap();
        assert!(response.leveling.is_none());
        assert_eq!(response.over_allocation_count, 1);
        assert!(response.histogram["crew"].iter().any(|u| u.over_allocated));
        assert_eq!(store.task_writes(), 0);
    }

    #[tokio::test]
    async fn test_auth_failures() {
        let (_store, service, project_id) = setup();
        assert!(matches!(
            service.level("bad", request(project_id, true)).await,
            Err(LevelingError::Unauthorized(_))
        ));
        assert!(matches!(
            service.level("good", request(Uuid::new_v4(), true)).await,
            Err(LevelingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_other_company_sees_not_found() {
        let (store, _service, project_id) = setup();
        let auth = StaticTokenAuth::default().with_token("stranger", "x", Uuid::new_v4());
        let service = LevelingService::new(
            store,
            Arc::new(auth),
            SolverConfig::default(),
            Duration::from_secs(10),
        );
        assert!(matches!(
            service.level("stranger", request(project_id, true)).await,
            Err(LevelingError::NotFound { entity: "project", .. })
        ));
    }

    #[tokio::test]
    async fn test_busy_project() {
        let (_store, service, project_id) = setup();
        let _held = service.locks().try_acquire(project_id).unwrap();
        assert_eq!(
            service.level("good", request(project_id, true)).await.unwrap_err(),
            LevelingError::Busy(project_id)
        );
    }

    /// Applies the first `limit` task updates, then fails.
    struct FailingStore {
        inner: InMemoryStore,
        limit: usize,
    }

    #[async_trait::async_trait]
    impl ScheduleStore for FailingStore {
        async fn project_owner(&self, project_id: Uuid) -> Result<Uuid, LevelingError> {
            self.inner.project_owner(project_id).await
        }

        async fn load_snapshot(&self, project_id: Uuid) -> Result<ProjectSnapshot, LevelingError> {
            self.inner.load_snapshot(project_id).await
        }

        async fn update_task_dates(
            &self,
            project_id: Uuid,
            update: &crate::models::TaskDateUpdate,
        ) -> Result<(), LevelingError> {
            if self.inner.task_writes() >= self.limit {
                return Err(LevelingError::Store("connection reset".to_string()));
            }
            self.inner.update_task_dates(project_id, update).await
        }

        async fn record_change(&self, change: ScheduleChange) -> Result<(), LevelingError> {
            self.inner.record_change(change).await
        }
    }

    #[tokio::test]
    async fn test_partial_write_back_names_written_tasks() {
        let company = Uuid::new_v4();
        let mut project = Project::new(Uuid::new_v4());
        project.company_id = company;
        project.planned_start = Some(d(2025, 1, 6));
        project.planned_finish = Some(d(2025, 3, 31));
        let project_id = project.id;
        let mut snap = ProjectSnapshot::new(project);
        snap.resources.push(Resource::new("crew", 1.0));
        for id in ["x", "y", "z"] {
            snap.tasks.push(Task::new(id, 1).with_planned_start(d(2025, 1, 6)));
            snap.assignments.push(Assignment::new(id, "crew", 1.0));
        }

        let store = Arc::new(FailingStore {
            inner: InMemoryStore::with_snapshots([snap]),
            limit: 1,
        });
        let auth = StaticTokenAuth::default().with_token("good", "planner", company);
        let service = LevelingService::new(
            store.clone(),
            Arc::new(auth),
            SolverConfig::default(),
            Duration::from_secs(10),
        );

        let err = service.level("good", request(project_id, true)).await.unwrap_err();
        let message = match err {
            LevelingError::Store(message) => message,
            other => panic!("expected a store error, got {:?}", other),
        };
        assert!(message.contains("connection reset"));
        assert!(message.contains("tasks already written"));

        let after = store.inner.snapshot(project_id).await.unwrap();
        let moved: Vec<&str> = after
            .tasks
            .iter()
            .filter(|t| t.planned_start != Some(d(2025, 1, 6)))
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(moved.len(), 1);
        assert!(message.ends_with(moved[0]));
        assert!(store.inner.changes().await.is_empty());
        assert!(!service.locks().is_held(project_id));
    }

    #[tokio::test]
    async fn test_validation_failure_writes_nothing() {
        let (store, service, project_id) = setup();
        let mut snap = store.snapshot(project_id).await.unwrap();
        snap.resources[0].max_units = 0.0;
        store.insert(snap).await;

        assert!(matches!(
            service.level("good", request(project_id, true)).await,
            Err(LevelingError::CapacityMisconfigured { .. })
        ));
        assert_eq!(store.task_writes(), 0);
        assert!(!service.locks().is_held(project_id));
    }
}
