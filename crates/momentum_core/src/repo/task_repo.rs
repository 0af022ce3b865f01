//! Task repository contract and SQLite implementation.
//!
//! # Invariants
//! - `(project, marker)` is unique, tombstoned rows included.
//! - Deletion through this contract is a tombstone, never a row delete.

use chrono::{DateTime, Utc};

use crate::model::project::ProjectId;
use crate::model::task::{Task, TaskId, TaskStatus, TaskType};
use crate::repo::{
    bool_to_int, from_ms, int_to_bool, opt_from_ms, opt_to_ms, parse_uuid, to_ms, RepoError,
    RepoResult, SqliteStore,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};

const TASK_SELECT_SQL: &str = "SELECT
    uuid,
    project_uuid,
    title,
    status,
    task_type,
    marker,
    line_hint,
    is_next_action,
    is_quick_win,
    is_unstuck,
    priority,
    due_at,
    defer_until,
    context,
    energy,
    estimated_minutes,
    completed_at,
    is_deleted,
    created_at,
    updated_at
FROM tasks";

/// Query options for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskListQuery {
    pub project_id: Option<ProjectId>,
    /// Empty means any status.
    pub statuses: Vec<TaskStatus>,
    pub include_deleted: bool,
}

impl TaskListQuery {
    pub fn for_project(project_id: ProjectId) -> Self {
        Self {
            project_id: Some(project_id),
            ..Self::default()
        }
    }
}

pub trait TaskRepository {
    fn create_task(&self, task: &Task) -> RepoResult<TaskId>;
    fn update_task(&self, task: &Task) -> RepoResult<()>;
    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>>;
    fn find_task_by_marker(&self, project_id: ProjectId, marker: &str) -> RepoResult<Option<Task>>;
    /// Ordered by line hint (unplaced last), then creation time.
    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<Task>>;
    fn soft_delete_task(&self, id: TaskId, deleted_at: DateTime<Utc>) -> RepoResult<()>;
}

impl TaskRepository for SqliteStore {
    fn create_task(&self, task: &Task) -> RepoResult<TaskId> {
        self.connection().execute(
            "INSERT INTO tasks (
                uuid, project_uuid, title, status, task_type, marker, line_hint,
                is_next_action, is_quick_win, is_unstuck, priority, due_at, defer_until,
                context, energy, estimated_minutes, completed_at, is_deleted,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                      ?17, ?18, ?19, ?20);",
            params![
                task.id.to_string(),
                task.project_id.to_string(),
                task.title.as_str(),
                task.status.as_str(),
                task.task_type.as_str(),
                task.marker.as_deref(),
                task.line_hint,
                bool_to_int(task.is_next_action),
                bool_to_int(task.is_quick_win),
                bool_to_int(task.is_unstuck),
                task.priority,
                opt_to_ms(task.due_at),
                opt_to_ms(task.defer_until),
                task.context.as_deref(),
                task.energy.as_deref(),
                task.estimated_minutes,
                opt_to_ms(task.completed_at),
                bool_to_int(task.is_deleted),
                to_ms(task.created_at),
                to_ms(task.updated_at),
            ],
        )?;
        Ok(task.id)
    }

    fn update_task(&self, task: &Task) -> RepoResult<()> {
        let changed = self.connection().execute(
            "UPDATE tasks
             SET
                project_uuid = ?1,
                title = ?2,
                status = ?3,
                task_type = ?4,
                marker = ?5,
                line_hint = ?6,
                is_next_action = ?7,
                is_quick_win = ?8,
                is_unstuck = ?9,
                priority = ?10,
                due_at = ?11,
                defer_until = ?12,
                context = ?13,
                energy = ?14,
                estimated_minutes = ?15,
                completed_at = ?16,
                is_deleted = ?17,
                updated_at = ?18
             WHERE uuid = ?19;",
            params![
                task.project_id.to_string(),
                task.title.as_str(),
                task.status.as_str(),
                task.task_type.as_str(),
                task.marker.as_deref(),
                task.line_hint,
                bool_to_int(task.is_next_action),
                bool_to_int(task.is_quick_win),
                bool_to_int(task.is_unstuck),
                task.priority,
                opt_to_ms(task.due_at),
                opt_to_ms(task.defer_until),
                task.context.as_deref(),
                task.energy.as_deref(),
                task.estimated_minutes,
                opt_to_ms(task.completed_at),
                bool_to_int(task.is_deleted),
                to_ms(task.updated_at),
                task.id.to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(task.id));
        }
        Ok(())
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("{TASK_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }
        Ok(None)
    }

    fn find_task_by_marker(&self, project_id: ProjectId, marker: &str) -> RepoResult<Option<Task>> {
        let mut stmt = self.connection().prepare(&format!(
            "{TASK_SELECT_SQL} WHERE project_uuid = ?1 AND marker = ?2;"
        ))?;
        let mut rows = stmt.query(params![project_id.to_string(), marker])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }
        Ok(None)
    }

    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<Task>> {
        let mut sql = format!("{TASK_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }

        if let Some(project_id) = query.project_id {
            sql.push_str(" AND project_uuid = ?");
            bind_values.push(Value::Text(project_id.to_string()));
        }

        if !query.statuses.is_empty() {
            let placeholders = vec!["?"; query.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({placeholders})"));
            for status in &query.statuses {
                bind_values.push(Value::Text(status.as_str().to_string()));
            }
        }

        sql.push_str(" ORDER BY line_hint IS NULL, line_hint ASC, created_at ASC, uuid ASC");

        let mut stmt = self.connection().prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }

    fn soft_delete_task(&self, id: TaskId, deleted_at: DateTime<Utc>) -> RepoResult<()> {
        let changed = self.connection().execute(
            "UPDATE tasks
             SET is_deleted = 1,
                 updated_at = ?2
             WHERE uuid = ?1;",
            params![id.to_string(), to_ms(deleted_at)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let uuid_text: String = row.get("uuid")?;
    let project_text: String = row.get("project_uuid")?;

    let status_text: String = row.get("status")?;
    let status = TaskStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid task status `{status_text}` in tasks.status"))
    })?;
    let type_text: String = row.get("task_type")?;
    let task_type = TaskType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid task type `{type_text}` in tasks.task_type"))
    })?;

    Ok(Task {
        id: parse_uuid(&uuid_text, "tasks.uuid")?,
        project_id: parse_uuid(&project_text, "tasks.project_uuid")?,
        title: row.get("title")?,
        status,
        task_type,
        marker: row.get("marker")?,
        line_hint: row.get("line_hint")?,
        is_next_action: int_to_bool(row.get("is_next_action")?, "tasks.is_next_action")?,
        is_quick_win: int_to_bool(row.get("is_quick_win")?, "tasks.is_quick_win")?,
        is_unstuck: int_to_bool(row.get("is_unstuck")?, "tasks.is_unstuck")?,
        priority: row.get("priority")?,
        due_at: opt_from_ms(row.get("due_at")?, "tasks.due_at")?,
        defer_until: opt_from_ms(row.get("defer_until")?, "tasks.defer_until")?,
        context: row.get("context")?,
        energy: row.get("energy")?,
        estimated_minutes: row.get("estimated_minutes")?,
        completed_at: opt_from_ms(row.get("completed_at")?, "tasks.completed_at")?,
        is_deleted: int_to_bool(row.get("is_deleted")?, "tasks.is_deleted")?,
        created_at: from_ms(row.get("created_at")?, "tasks.created_at")?,
        updated_at: from_ms(row.get("updated_at")?, "tasks.updated_at")?,
    })
}
