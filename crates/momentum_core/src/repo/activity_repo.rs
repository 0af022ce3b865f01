//! Activity log repository contract and SQLite implementation.
//!
//! # Invariants
//! - Entries are append-only; the only removal path is retention pruning.

use crate::model::activity::{Activity, ActivityAction, ActivitySource, EntityType};
use crate::model::project::ProjectId;
use crate::repo::{
    from_ms, opt_parse_uuid, opt_to_ms, parse_uuid, to_ms, RepoError, RepoResult, SqliteStore,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

/// Query options for listing activity.
#[derive(Debug, Clone, Default)]
pub struct ActivityQuery {
    pub project_id: Option<ProjectId>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
}

pub trait ActivityRepository {
    fn append_activity(&self, activity: &Activity) -> RepoResult<()>;
    /// Ordered oldest first.
    fn list_activities(&self, query: &ActivityQuery) -> RepoResult<Vec<Activity>>;
    /// Deletes entries strictly older than `before`; returns the count.
    fn prune_activities(&self, before: DateTime<Utc>) -> RepoResult<usize>;
}

impl ActivityRepository for SqliteStore {
    fn append_activity(&self, activity: &Activity) -> RepoResult<()> {
        self.connection().execute(
            "INSERT INTO activities (
                uuid, entity_type, entity_uuid, project_uuid, action, source, detail, occurred_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                activity.id.to_string(),
                activity.entity_type.as_str(),
                activity.entity_id.to_string(),
                activity.project_id.map(|id| id.to_string()),
                activity.action.as_str(),
                activity.source.as_str(),
                activity.detail.as_deref(),
                to_ms(activity.occurred_at),
            ],
        )?;
        Ok(())
    }

    fn list_activities(&self, query: &ActivityQuery) -> RepoResult<Vec<Activity>> {
        let mut stmt = self.connection().prepare(
            "SELECT uuid, entity_type, entity_uuid, project_uuid, action, source, detail, occurred_at
             FROM activities
             WHERE (?1 IS NULL OR project_uuid = ?1)
               AND (?2 IS NULL OR occurred_at >= ?2)
             ORDER BY occurred_at ASC, uuid ASC;",
        )?;
        let mut rows = stmt.query(params![
            query.project_id.map(|id| id.to_string()),
            opt_to_ms(query.since),
        ])?;
        let mut activities = Vec::new();
        while let Some(row) = rows.next()? {
            activities.push(parse_activity_row(row)?);
        }
        Ok(activities)
    }

    fn prune_activities(&self, before: DateTime<Utc>) -> RepoResult<usize> {
        let removed = self.connection().execute(
            "DELETE FROM activities WHERE occurred_at < ?1;",
            [to_ms(before)],
        )?;
        Ok(removed)
    }
}

fn parse_activity_row(row: &Row<'_>) -> RepoResult<Activity> {
    let uuid_text: String = row.get("uuid")?;
    let entity_text: String = row.get("entity_uuid")?;
    let type_text: String = row.get("entity_type")?;
    let action_text: String = row.get("action")?;
    let source_text: String = row.get("source")?;

    Ok(Activity {
        id: parse_uuid(&uuid_text, "activities.uuid")?,
        entity_type: EntityType::parse(&type_text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid entity type `{type_text}`"))
        })?,
        entity_id: parse_uuid(&entity_text, "activities.entity_uuid")?,
        project_id: opt_parse_uuid(row.get("project_uuid")?, "activities.project_uuid")?,
        action: ActivityAction::parse(&action_text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid activity action `{action_text}`"))
        })?,
        source: ActivitySource::parse(&source_text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid activity source `{source_text}`"))
        })?,
        detail: row.get("detail")?,
        occurred_at: from_ms(row.get("occurred_at")?, "activities.occurred_at")?,
    })
}
