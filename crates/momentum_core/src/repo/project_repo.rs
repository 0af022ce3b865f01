//! Project repository contract and SQLite implementation.

use crate::model::project::{
    clamp_score, MomentumTrend, Project, ProjectId, ProjectStatus,
};
use crate::repo::{
    from_ms, opt_from_ms, opt_parse_uuid, opt_to_ms, parse_uuid, to_ms, RepoError, RepoResult,
    SqliteStore,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};
use uuid::Uuid;

const PROJECT_SELECT_SQL: &str = "SELECT
    uuid,
    external_id,
    title,
    status,
    priority,
    momentum_score,
    previous_momentum,
    trend,
    stalled_since,
    last_activity_at,
    file_path,
    content_fingerprint,
    area_uuid,
    created_at,
    updated_at
FROM projects";

/// Query options for listing projects.
#[derive(Debug, Clone, Default)]
pub struct ProjectListQuery {
    /// Empty means any status.
    pub statuses: Vec<ProjectStatus>,
    pub area_id: Option<Uuid>,
}

impl ProjectListQuery {
    /// Projects whose status the momentum engine owns.
    pub fn tracked() -> Self {
        Self {
            statuses: vec![
                ProjectStatus::Active,
                ProjectStatus::AtRisk,
                ProjectStatus::Stalled,
            ],
            area_id: None,
        }
    }
}

pub trait ProjectRepository {
    fn create_project(&self, project: &Project) -> RepoResult<ProjectId>;
    fn update_project(&self, project: &Project) -> RepoResult<()>;
    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>>;
    fn find_project_by_path(&self, file_path: &str) -> RepoResult<Option<Project>>;
    fn find_project_by_external_id(&self, external_id: &str) -> RepoResult<Option<Project>>;
    fn list_projects(&self, query: &ProjectListQuery) -> RepoResult<Vec<Project>>;
    fn delete_project(&self, id: ProjectId) -> RepoResult<()>;
}

impl ProjectRepository for SqliteStore {
    fn create_project(&self, project: &Project) -> RepoResult<ProjectId> {
        self.connection().execute(
            "INSERT INTO projects (
                uuid, title, status, priority, momentum_score, previous_momentum, trend,
                stalled_since, last_activity_at, file_path, content_fingerprint, area_uuid,
                created_at, updated_at, external_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15);",
            params![
                project.id.to_string(),
                project.title.as_str(),
                project.status.as_str(),
                project.priority,
                clamp_score(project.momentum_score),
                project.previous_momentum,
                project.trend.as_str(),
                opt_to_ms(project.stalled_since),
                opt_to_ms(project.last_activity_at),
                project.file_path.as_deref(),
                project.content_fingerprint.as_deref(),
                project.area_id.map(|id| id.to_string()),
                to_ms(project.created_at),
                to_ms(project.updated_at),
                project.external_id.as_deref(),
            ],
        )?;
        Ok(project.id)
    }

    fn update_project(&self, project: &Project) -> RepoResult<()> {
        let changed = self.connection().execute(
            "UPDATE projects
             SET
                title = ?1,
                status = ?2,
                priority = ?3,
                momentum_score = ?4,
                previous_momentum = ?5,
                trend = ?6,
                stalled_since = ?7,
                last_activity_at = ?8,
                file_path = ?9,
                content_fingerprint = ?10,
                area_uuid = ?11,
                updated_at = ?12,
                external_id = ?13
             WHERE uuid = ?14;",
            params![
                project.title.as_str(),
                project.status.as_str(),
                project.priority,
                clamp_score(project.momentum_score),
                project.previous_momentum,
                project.trend.as_str(),
                opt_to_ms(project.stalled_since),
                opt_to_ms(project.last_activity_at),
                project.file_path.as_deref(),
                project.content_fingerprint.as_deref(),
                project.area_id.map(|id| id.to_string()),
                to_ms(project.updated_at),
                project.external_id.as_deref(),
                project.id.to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(project.id));
        }
        Ok(())
    }

    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("{PROJECT_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_project_row(row)?));
        }
        Ok(None)
    }

    fn find_project_by_path(&self, file_path: &str) -> RepoResult<Option<Project>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("{PROJECT_SELECT_SQL} WHERE file_path = ?1;"))?;
        let mut rows = stmt.query([file_path])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_project_row(row)?));
        }
        Ok(None)
    }

    fn find_project_by_external_id(&self, external_id: &str) -> RepoResult<Option<Project>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("{PROJECT_SELECT_SQL} WHERE external_id = ?1;"))?;
        let mut rows = stmt.query([external_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_project_row(row)?));
        }
        Ok(None)
    }

    fn list_projects(&self, query: &ProjectListQuery) -> RepoResult<Vec<Project>> {
        let mut sql = format!("{PROJECT_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.statuses.is_empty() {
            let placeholders = vec!["?"; query.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({placeholders})"));
            for status in &query.statuses {
                bind_values.push(Value::Text(status.as_str().to_string()));
            }
        }

        if let Some(area_id) = query.area_id {
            sql.push_str(" AND area_uuid = ?");
            bind_values.push(Value::Text(area_id.to_string()));
        }

        sql.push_str(" ORDER BY title COLLATE NOCASE ASC, uuid ASC");

        let mut stmt = self.connection().prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut projects = Vec::new();
        while let Some(row) = rows.next()? {
            projects.push(parse_project_row(row)?);
        }
        Ok(projects)
    }

    fn delete_project(&self, id: ProjectId) -> RepoResult<()> {
        let changed = self
            .connection()
            .execute("DELETE FROM projects WHERE uuid = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }
}

fn parse_project_row(row: &Row<'_>) -> RepoResult<Project> {
    let uuid_text: String = row.get("uuid")?;
    let status_text: String = row.get("status")?;
    let status = ProjectStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid project status `{status_text}` in projects.status"))
    })?;
    let trend_text: String = row.get("trend")?;
    let trend = MomentumTrend::parse(&trend_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid trend `{trend_text}` in projects.trend"))
    })?;

    Ok(Project {
        id: parse_uuid(&uuid_text, "projects.uuid")?,
        external_id: row.get("external_id")?,
        title: row.get("title")?,
        status,
        priority: row.get("priority")?,
        momentum_score: row.get("momentum_score")?,
        previous_momentum: row.get("previous_momentum")?,
        trend,
        stalled_since: opt_from_ms(row.get("stalled_since")?, "projects.stalled_since")?,
        last_activity_at: opt_from_ms(row.get("last_activity_at")?, "projects.last_activity_at")?,
        file_path: row.get("file_path")?,
        content_fingerprint: row.get("content_fingerprint")?,
        area_id: opt_parse_uuid(row.get("area_uuid")?, "projects.area_uuid")?,
        created_at: from_ms(row.get("created_at")?, "projects.created_at")?,
        updated_at: from_ms(row.get("updated_at")?, "projects.updated_at")?,
    })
}
