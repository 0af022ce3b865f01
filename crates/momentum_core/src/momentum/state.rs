//! Project status transitions and trend classification.
//!
//! # Invariants
//! - Only `active`, `at_risk` and `stalled` projects change status here.
//! - `stalled_since` is set exactly while a project is `stalled`.

use crate::config::MomentumConfig;
use crate::model::project::{MomentumTrend, ProjectStatus};
use chrono::{DateTime, Utc};

/// Next status for a tracked project.
///
/// Untracked statuses are returned unchanged.
pub fn next_status(
    current: ProjectStatus,
    days_inactive: f64,
    score: f64,
    config: &MomentumConfig,
) -> ProjectStatus {
    if !current.is_tracked() {
        return current;
    }
    if days_inactive >= config.stalled_days as f64 {
        ProjectStatus::Stalled
    } else if days_inactive >= config.at_risk_days as f64 || score < config.low_water_mark {
        ProjectStatus::AtRisk
    } else {
        ProjectStatus::Active
    }
}

/// Keeps `stalled_since` when staying stalled, stamps it on entry and
/// clears it on exit.
pub fn stalled_since(
    previous: ProjectStatus,
    next: ProjectStatus,
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match (previous, next) {
        (ProjectStatus::Stalled, ProjectStatus::Stalled) => current.or(Some(now)),
        (_, ProjectStatus::Stalled) => Some(now),
        _ => None,
    }
}

pub fn classify_trend(previous: f64, current: f64, dead_zone: f64) -> MomentumTrend {
    let delta = current - previous;
    if delta > dead_zone {
        MomentumTrend::Rising
    } else if delta < -dead_zone {
        MomentumTrend::Falling
    } else {
        MomentumTrend::Stable
    }
}
