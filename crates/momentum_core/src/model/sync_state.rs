//! Per-file sync bookkeeping.
//!
//! # Invariants
//! - Exactly one record per tracked file path.
//! - An equal fingerprint means no sync action is needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::project::ProjectId;

pub type SyncStateId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    Pending,
    Conflict,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Conflict => "conflict",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "synced" => Some(Self::Synced),
            "pending" => Some(Self::Pending),
            "conflict" => Some(Self::Conflict),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub id: SyncStateId,
    pub file_path: String,
    pub project_id: Option<ProjectId>,
    pub last_fingerprint: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_file_mtime: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub last_error: Option<String>,
}

impl SyncState {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_path: file_path.into(),
            project_id: None,
            last_fingerprint: None,
            last_synced_at: None,
            last_file_mtime: None,
            status: SyncStatus::Pending,
            last_error: None,
        }
    }

    /// Marks a successful sync at `now` with the given content fingerprint.
    pub fn mark_synced(
        &mut self,
        fingerprint: String,
        file_mtime: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.last_fingerprint = Some(fingerprint);
        self.last_file_mtime = file_mtime;
        self.last_synced_at = Some(now);
        self.status = SyncStatus::Synced;
        self.last_error = None;
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = SyncStatus::Error;
        self.last_error = Some(message.into());
    }

    pub fn mark_conflict(&mut self, file_mtime: Option<DateTime<Utc>>) {
        self.status = SyncStatus::Conflict;
        self.last_file_mtime = file_mtime;
        self.last_error = None;
    }
}
