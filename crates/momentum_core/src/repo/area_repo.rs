//! Area repository contract and SQLite implementation.

use crate::model::area::{Area, AreaId};
use crate::repo::{from_ms, parse_uuid, to_ms, RepoResult, SqliteStore};
use rusqlite::{params, Row};

pub trait AreaRepository {
    fn create_area(&self, area: &Area) -> RepoResult<AreaId>;
    fn get_area(&self, id: AreaId) -> RepoResult<Option<Area>>;
    /// Case-insensitive lookup.
    fn find_area_by_name(&self, name: &str) -> RepoResult<Option<Area>>;
    fn list_areas(&self) -> RepoResult<Vec<Area>>;
}

impl AreaRepository for SqliteStore {
    fn create_area(&self, area: &Area) -> RepoResult<AreaId> {
        self.connection().execute(
            "INSERT INTO areas (uuid, name, folder_path, created_at) VALUES (?1, ?2, ?3, ?4);",
            params![
                area.id.to_string(),
                area.name.as_str(),
                area.folder_path.as_deref(),
                to_ms(area.created_at),
            ],
        )?;
        Ok(area.id)
    }

    fn get_area(&self, id: AreaId) -> RepoResult<Option<Area>> {
        let mut stmt = self.connection().prepare(
            "SELECT uuid, name, folder_path, created_at FROM areas WHERE uuid = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_area_row(row)?));
        }
        Ok(None)
    }

    fn find_area_by_name(&self, name: &str) -> RepoResult<Option<Area>> {
        let mut stmt = self.connection().prepare(
            "SELECT uuid, name, folder_path, created_at
             FROM areas
             WHERE name = ?1 COLLATE NOCASE;",
        )?;
        let mut rows = stmt.query([name.trim()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_area_row(row)?));
        }
        Ok(None)
    }

    fn list_areas(&self) -> RepoResult<Vec<Area>> {
        let mut stmt = self.connection().prepare(
            "SELECT uuid, name, folder_path, created_at
             FROM areas
             ORDER BY name COLLATE NOCASE ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut areas = Vec::new();
        while let Some(row) = rows.next()? {
            areas.push(parse_area_row(row)?);
        }
        Ok(areas)
    }
}

fn parse_area_row(row: &Row<'_>) -> RepoResult<Area> {
    let uuid_text: String = row.get("uuid")?;
    Ok(Area {
        id: parse_uuid(&uuid_text, "areas.uuid")?,
        name: row.get("name")?,
        folder_path: row.get("folder_path")?,
        created_at: from_ms(row.get("created_at")?, "areas.created_at")?,
    })
}
