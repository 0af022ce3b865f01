//! Append-only activity log entries feeding momentum computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::project::ProjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Project,
    Task,
    Area,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Task => "task",
            Self::Area => "area",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "project" => Some(Self::Project),
            "task" => Some(Self::Task),
            "area" => Some(Self::Area),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Updated,
    Renamed,
    Completed,
    Reopened,
    Deleted,
    StatusChanged,
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Renamed => "renamed",
            Self::Completed => "completed",
            Self::Reopened => "reopened",
            Self::Deleted => "deleted",
            Self::StatusChanged => "status_changed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "renamed" => Some(Self::Renamed),
            "completed" => Some(Self::Completed),
            "reopened" => Some(Self::Reopened),
            "deleted" => Some(Self::Deleted),
            "status_changed" => Some(Self::StatusChanged),
            _ => None,
        }
    }
}

/// Where a change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    File,
    Store,
    System,
}

impl ActivitySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Store => "store",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(Self::File),
            "store" => Some(Self::Store),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub project_id: Option<ProjectId>,
    pub action: ActivityAction,
    pub source: ActivitySource,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        entity_type: EntityType,
        entity_id: Uuid,
        project_id: Option<ProjectId>,
        action: ActivityAction,
        source: ActivitySource,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type,
            entity_id,
            project_id,
            action,
            source,
            detail: None,
            occurred_at,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
