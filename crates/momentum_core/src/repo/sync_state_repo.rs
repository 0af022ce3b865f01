//! Sync-State repository contract and SQLite implementation.

use crate::model::project::ProjectId;
use crate::model::sync_state::{SyncState, SyncStateId, SyncStatus};
use crate::repo::{
    opt_from_ms, opt_parse_uuid, opt_to_ms, parse_uuid, RepoError, RepoResult, SqliteStore,
};
use rusqlite::{params, Row};

const SYNC_STATE_SELECT_SQL: &str = "SELECT
    uuid,
    file_path,
    project_uuid,
    last_fingerprint,
    last_synced_at,
    last_file_mtime,
    status,
    last_error
FROM sync_states";

pub trait SyncStateRepository {
    /// Inserts or replaces the record keyed by `file_path`.
    fn upsert_sync_state(&self, state: &SyncState) -> RepoResult<()>;
    fn get_sync_state(&self, id: SyncStateId) -> RepoResult<Option<SyncState>>;
    fn find_sync_state_by_path(&self, file_path: &str) -> RepoResult<Option<SyncState>>;
    fn find_sync_state_by_project(&self, project_id: ProjectId) -> RepoResult<Option<SyncState>>;
    /// `None` lists every record.
    fn list_sync_states(&self, status: Option<SyncStatus>) -> RepoResult<Vec<SyncState>>;
}

impl SyncStateRepository for SqliteStore {
    fn upsert_sync_state(&self, state: &SyncState) -> RepoResult<()> {
        self.connection().execute(
            "INSERT INTO sync_states (
                uuid, file_path, project_uuid, last_fingerprint, last_synced_at,
                last_file_mtime, status, last_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(file_path) DO UPDATE SET
                project_uuid = excluded.project_uuid,
                last_fingerprint = excluded.last_fingerprint,
                last_synced_at = excluded.last_synced_at,
                last_file_mtime = excluded.last_file_mtime,
                status = excluded.status,
                last_error = excluded.last_error;",
            params![
                state.id.to_string(),
                state.file_path.as_str(),
                state.project_id.map(|id| id.to_string()),
                state.last_fingerprint.as_deref(),
                opt_to_ms(state.last_synced_at),
                opt_to_ms(state.last_file_mtime),
                state.status.as_str(),
                state.last_error.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn get_sync_state(&self, id: SyncStateId) -> RepoResult<Option<SyncState>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("{SYNC_STATE_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_sync_state_row(row)?));
        }
        Ok(None)
    }

    fn find_sync_state_by_path(&self, file_path: &str) -> RepoResult<Option<SyncState>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("{SYNC_STATE_SELECT_SQL} WHERE file_path = ?1;"))?;
        let mut rows = stmt.query([file_path])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_sync_state_row(row)?));
        }
        Ok(None)
    }

    fn find_sync_state_by_project(&self, project_id: ProjectId) -> RepoResult<Option<SyncState>> {
        let mut stmt = self.connection().prepare(&format!(
            "{SYNC_STATE_SELECT_SQL} WHERE project_uuid = ?1 ORDER BY file_path ASC LIMIT 1;"
        ))?;
        let mut rows = stmt.query([project_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_sync_state_row(row)?));
        }
        Ok(None)
    }

    fn list_sync_states(&self, status: Option<SyncStatus>) -> RepoResult<Vec<SyncState>> {
        let mut stmt = self.connection().prepare(&format!(
            "{SYNC_STATE_SELECT_SQL}
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY file_path ASC;"
        ))?;
        let mut rows = stmt.query([status.map(SyncStatus::as_str)])?;
        let mut states = Vec::new();
        while let Some(row) = rows.next()? {
            states.push(parse_sync_state_row(row)?);
        }
        Ok(states)
    }
}

fn parse_sync_state_row(row: &Row<'_>) -> RepoResult<SyncState> {
    let uuid_text: String = row.get("uuid")?;
    let status_text: String = row.get("status")?;
    let status = SyncStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid sync status `{status_text}` in sync_states.status"
        ))
    })?;

    Ok(SyncState {
        id: parse_uuid(&uuid_text, "sync_states.uuid")?,
        file_path: row.get("file_path")?,
        project_id: opt_parse_uuid(row.get("project_uuid")?, "sync_states.project_uuid")?,
        last_fingerprint: row.get("last_fingerprint")?,
        last_synced_at: opt_from_ms(row.get("last_synced_at")?, "sync_states.last_synced_at")?,
        last_file_mtime: opt_from_ms(row.get("last_file_mtime")?, "sync_states.last_file_mtime")?,
        status,
        last_error: row.get("last_error")?,
    })
}
