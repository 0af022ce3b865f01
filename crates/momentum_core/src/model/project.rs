//! Project domain model.
//!
//! # Invariants
//! - `momentum_score` is always within `[0, 1]` (see [`clamp_score`]).
//! - `file_path`, when set, is unique across projects.
//! - `priority`, when set, is within `1..=5`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ProjectId = Uuid;

pub const PRIORITY_MIN: i64 = 1;
pub const PRIORITY_MAX: i64 = 5;

/// Lifecycle status of a project.
///
/// `Active`, `AtRisk` and `Stalled` are driven by the momentum engine;
/// the remaining states are only ever set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    AtRisk,
    Stalled,
    OnHold,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::AtRisk => "at_risk",
            Self::Stalled => "stalled",
            Self::OnHold => "on_hold",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    /// Parses a status label leniently (case, `-`/space separators).
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "active" => Some(Self::Active),
            "at_risk" | "atrisk" => Some(Self::AtRisk),
            "stalled" => Some(Self::Stalled),
            "on_hold" | "onhold" | "paused" => Some(Self::OnHold),
            "completed" | "done" => Some(Self::Completed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Whether the momentum engine owns transitions for this status.
    pub fn is_tracked(self) -> bool {
        matches!(self, Self::Active | Self::AtRisk | Self::Stalled)
    }
}

/// Direction of the last momentum change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumTrend {
    Rising,
    Falling,
    Stable,
}

impl MomentumTrend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rising => "rising",
            Self::Falling => "falling",
            Self::Stable => "stable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rising" => Some(Self::Rising),
            "falling" => Some(Self::Falling),
            "stable" => Some(Self::Stable),
            _ => None,
        }
    }
}

/// Canonical project record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Header identifier kept verbatim when it is not `id` itself; the
    /// writer falls back to `id` when absent.
    pub external_id: Option<String>,
    pub title: String,
    pub status: ProjectStatus,
    pub priority: Option<i64>,
    pub momentum_score: f64,
    pub previous_momentum: Option<f64>,
    pub trend: MomentumTrend,
    pub stalled_since: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Linked markdown file; unique across projects.
    pub file_path: Option<String>,
    /// Fingerprint of the linked file content at last sync.
    pub content_fingerprint: Option<String>,
    pub area_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::with_id(Uuid::new_v4(), title, now)
    }

    /// Creates a project with a caller-provided id.
    ///
    /// Used when a file header already carries an `external_id`.
    pub fn with_id(id: ProjectId, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            external_id: None,
            title: title.into(),
            status: ProjectStatus::Active,
            priority: None,
            momentum_score: 0.0,
            previous_momentum: None,
            trend: MomentumTrend::Stable,
            stalled_since: None,
            last_activity_at: None,
            file_path: None,
            content_fingerprint: None,
            area_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identifier written to the `external_id` header key.
    pub fn header_id(&self) -> String {
        self.external_id
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Records activity at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = Some(now);
        self.updated_at = now;
    }
}

/// Clamps a momentum value into `[0, 1]`; NaN becomes 0.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Clamps a priority into `PRIORITY_MIN..=PRIORITY_MAX`.
pub fn clamp_priority(value: i64) -> i64 {
    value.clamp(PRIORITY_MIN, PRIORITY_MAX)
}

#[cfg(test)]
mod tests {
    use super::{clamp_score, ProjectStatus};

    #[test]
    fn status_parse_is_lenient() {
        assert_eq!(ProjectStatus::parse("At-Risk"), Some(ProjectStatus::AtRisk));
        assert_eq!(ProjectStatus::parse(" on hold "), Some(ProjectStatus::OnHold));
        assert_eq!(ProjectStatus::parse("bogus"), None);
    }

    #[test]
    fn clamp_score_handles_nan_and_bounds() {
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(1.7), 1.0);
        assert_eq!(clamp_score(-0.2), 0.0);
    }
}
