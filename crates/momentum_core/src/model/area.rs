//! Area of responsibility that groups projects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AreaId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: AreaId,
    /// Unique, case-insensitive.
    pub name: String,
    /// Folder the area was discovered from, when auto-registered.
    pub folder_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Area {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            folder_path: None,
            created_at: now,
        }
    }
}
