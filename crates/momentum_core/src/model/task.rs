//! Task domain model.
//!
//! # Invariants
//! - `marker` is assigned once and never regenerated.
//! - `is_deleted` is a tombstone; deleted tasks keep their marker reserved.
//! - `completed_at` is set iff `status == Completed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::project::ProjectId;

pub type TaskId = Uuid;

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Waiting,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "waiting" => Some(Self::Waiting),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Open tasks are the ones that still render as `- [ ]`.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Waiting)
    }
}

/// Kind of item, derived from the section a line lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Action,
    WaitingFor,
    Someday,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::WaitingFor => "waiting_for",
            Self::Someday => "someday",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "action" => Some(Self::Action),
            "waiting_for" | "waiting" => Some(Self::WaitingFor),
            "someday" => Some(Self::Someday),
            _ => None,
        }
    }

    /// Suffix written after the marker token (`marker:abc123:waiting`).
    pub fn marker_suffix(self) -> Option<&'static str> {
        match self {
            Self::Action => None,
            Self::WaitingFor => Some("waiting"),
            Self::Someday => Some("someday"),
        }
    }

    /// Heading used when a section for this type has to be created.
    pub fn section_heading(self) -> &'static str {
        match self {
            Self::Action => "Next Actions",
            Self::WaitingFor => "Waiting For",
            Self::Someday => "Someday / Maybe",
        }
    }
}

/// Canonical task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub title: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    /// Opaque identity token embedded in the linked file.
    pub marker: Option<String>,
    /// Last known zero-based line offset in the linked file.
    pub line_hint: Option<u32>,
    pub is_next_action: bool,
    pub is_quick_win: bool,
    pub is_unstuck: bool,
    pub priority: Option<i64>,
    pub due_at: Option<DateTime<Utc>>,
    pub defer_until: Option<DateTime<Utc>>,
    pub context: Option<String>,
    pub energy: Option<String>,
    pub estimated_minutes: Option<u32>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(project_id: ProjectId, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            title: title.into(),
            status: TaskStatus::Pending,
            task_type: TaskType::Action,
            marker: None,
            line_hint: None,
            is_next_action: false,
            is_quick_win: false,
            is_unstuck: false,
            priority: None,
            due_at: None,
            defer_until: None,
            context: None,
            energy: None,
            estimated_minutes: None,
            completed_at: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the task to `status`, keeping `completed_at` consistent.
    ///
    /// Returns `false` when the status was already `status`.
    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.completed_at = if status == TaskStatus::Completed {
            Some(now)
        } else {
            None
        };
        self.updated_at = now;
        true
    }

    pub fn is_actionable(&self) -> bool {
        !self.is_deleted && matches!(self.status, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::{Task, TaskStatus};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn set_status_tracks_completion_time() {
        let now = Utc::now();
        let mut task = Task::new(Uuid::new_v4(), "write report", now);
        assert!(task.set_status(TaskStatus::Completed, now));
        assert_eq!(task.completed_at, Some(now));
        assert!(!task.set_status(TaskStatus::Completed, now));
        assert!(task.set_status(TaskStatus::Pending, now));
        assert!(task.completed_at.is_none());
    }
}
