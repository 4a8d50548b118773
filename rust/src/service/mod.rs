//! Request orchestration and its external boundaries.

mod auth;
mod locks;
mod orchestrator;
mod store;

pub use auth::{AuthService, Principal, StaticTokenAuth};
pub use locks::{ProjectLockGuard, ProjectLocks};
pub use orchestrator::{LevelRequest, LevelResponse, LevelingService, CHANGE_SOURCE};
pub use store::{InMemoryStore, ScheduleChange, ScheduleStore};
