//! Core engine for a markdown-backed project and task tracker.
//! This crate is the single source of truth for sync and momentum rules.

pub mod config;
pub mod db;
pub mod document;
pub mod logging;
pub mod model;
pub mod momentum;
pub mod repo;
pub mod service;
pub mod sync;
pub mod watch;

pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::project::{Project, ProjectId, ProjectStatus};
pub use model::task::{Task, TaskId, TaskStatus, TaskType};
pub use momentum::{MomentumEngine, RankFilters, RankedTask, RecomputeReport};
pub use repo::{RepoError, RepoResult, SqliteStore, Store};
pub use service::{ServiceError, TaskService};
pub use sync::{PathLocks, PullOutcome, PushOutcome, SyncEngine, SyncError};
pub use watch::FileWatcher;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
