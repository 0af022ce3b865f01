//! Task use-case service for store-side edits.
//!
//! # Responsibility
//! - Provide create/complete/status/rename/delete entry points that do not
//!   originate from a tracked file.
//! - Record each mutation in the activity log with `store` source.
//!
//! # Invariants
//! - Every successful mutation bumps the owning project's `updated_at` so
//!   the next push sees the store as changed.
//! - Deletion is a tombstone; the marker stays reserved.
//! - A call that changes nothing writes nothing.

use crate::document::writer::sanitize_title;
use crate::model::activity::{Activity, ActivityAction, ActivitySource, EntityType};
use crate::model::project::{Project, ProjectId};
use crate::model::task::{Task, TaskId, TaskStatus, TaskType};
use crate::repo::{RepoError, Store};
use chrono::{DateTime, Utc};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for task use-cases.
#[derive(Debug)]
pub enum ServiceError {
    /// Title is empty after sanitizing.
    InvalidTitle(String),
    ProjectNotFound(ProjectId),
    TaskNotFound(TaskId),
    /// Target task is a tombstone.
    TaskDeleted(TaskId),
    Repo(RepoError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTitle(value) => write!(f, "invalid task title: `{value}`"),
            Self::ProjectNotFound(id) => write!(f, "project not found: {id}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::TaskDeleted(id) => write!(f, "task was deleted: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Task service facade over a borrowed store.
pub struct TaskService<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> TaskService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Creates a pending task under `project_id`.
    ///
    /// The task has no marker and no line until the next push writes it.
    pub fn create_task(
        &self,
        project_id: ProjectId,
        title: &str,
        task_type: TaskType,
        now: DateTime<Utc>,
    ) -> ServiceResult<Task> {
        let title = clean_title(title)?;
        self.store.in_transaction(|store| {
            let mut project = load_project(store, project_id)?;
            let mut task = Task::new(project_id, title, now);
            task.task_type = task_type;
            store.create_task(&task)?;
            record(store, &mut project, &task, ActivityAction::Created, None, now)?;
            Ok(task)
        })
    }

    pub fn complete_task(&self, task_id: TaskId, now: DateTime<Utc>) -> ServiceResult<Task> {
        self.set_status(task_id, TaskStatus::Completed, now)
    }

    /// Moves a task to `status`; returns the task unchanged when it already
    /// has that status.
    pub fn set_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> ServiceResult<Task> {
        self.store.in_transaction(|store| {
            let mut task = load_live_task(store, task_id)?;
            let previous = task.status;
            if !task.set_status(status, now) {
                return Ok(task);
            }
            store.update_task(&task)?;

            let action = match (previous.is_open(), status) {
                (_, TaskStatus::Completed) => ActivityAction::Completed,
                (false, _) if status.is_open() => ActivityAction::Reopened,
                _ => ActivityAction::StatusChanged,
            };
            let detail = format!("{} -> {}", previous.as_str(), status.as_str());
            let mut project = load_project(store, task.project_id)?;
            record(store, &mut project, &task, action, Some(detail), now)?;
            Ok(task)
        })
    }

    pub fn rename_task(
        &self,
        task_id: TaskId,
        title: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<Task> {
        let title = clean_title(title)?;
        self.store.in_transaction(|store| {
            let mut task = load_live_task(store, task_id)?;
            if task.title == title {
                return Ok(task);
            }
            let detail = format!("{} -> {}", task.title, title);
            task.title = title;
            task.updated_at = now;
            store.update_task(&task)?;

            let mut project = load_project(store, task.project_id)?;
            record(store, &mut project, &task, ActivityAction::Renamed, Some(detail), now)?;
            Ok(task)
        })
    }

    /// Tombstones a task; its line disappears from the file on next push.
    pub fn delete_task(&self, task_id: TaskId, now: DateTime<Utc>) -> ServiceResult<()> {
        self.store.in_transaction(|store| {
            let task = load_live_task(store, task_id)?;
            store.soft_delete_task(task_id, now)?;
            let mut project = load_project(store, task.project_id)?;
            record(store, &mut project, &task, ActivityAction::Deleted, None, now)
        })
    }
}

fn clean_title(title: &str) -> ServiceResult<String> {
    let cleaned = sanitize_title(title);
    if cleaned.is_empty() {
        return Err(ServiceError::InvalidTitle(title.to_string()));
    }
    Ok(cleaned)
}

fn load_project<S: Store>(store: &S, project_id: ProjectId) -> ServiceResult<Project> {
    store
        .get_project(project_id)?
        .ok_or(ServiceError::ProjectNotFound(project_id))
}

fn load_live_task<S: Store>(store: &S, task_id: TaskId) -> ServiceResult<Task> {
    let task = store
        .get_task(task_id)?
        .ok_or(ServiceError::TaskNotFound(task_id))?;
    if task.is_deleted {
        return Err(ServiceError::TaskDeleted(task_id));
    }
    Ok(task)
}

fn record<S: Store>(
    store: &S,
    project: &mut Project,
    task: &Task,
    action: ActivityAction,
    detail: Option<String>,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    project.touch(now);
    store.update_project(project)?;

    let mut activity = Activity::new(
        EntityType::Task,
        task.id,
        Some(project.id),
        action,
        ActivitySource::Store,
        now,
    );
    activity.detail = detail;
    store.append_activity(&activity)?;

    info!(
        "event=task_{} module=service status=ok project_id={} task_id={}",
        action.as_str(),
        project.id,
        task.id
    );
    Ok(())
}
