//! Momentum factor computation.
//!
//! # Responsibility
//! - Derive the four momentum factors of one project from its tasks and
//!   its activity history.
//! - Combine them into a bounded score.
//!
//! # Invariants
//! - Every factor and the combined score lie in `[0, 1]`.
//! - `system`-sourced activity never counts as user activity.

use crate::config::MomentumConfig;
use crate::model::activity::{Activity, ActivitySource};
use crate::model::project::{clamp_score, Project};
use crate::model::task::{Task, TaskStatus, TaskType};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Raw factor values before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MomentumFactors {
    pub recency: f64,
    pub completion: f64,
    pub next_action: f64,
    pub frequency: f64,
}

impl MomentumFactors {
    /// Weighted sum, rounded to three decimals and clamped to `[0, 1]`.
    pub fn score(&self, config: &MomentumConfig) -> f64 {
        let weights = config.weights.normalized();
        let raw = weights.recency * self.recency
            + weights.completion * self.completion
            + weights.next_action * self.next_action
            + weights.frequency * self.frequency;
        clamp_score((raw * 1000.0).round() / 1000.0)
    }
}

/// Computes all factors for `project` as of `now`.
///
/// `tasks` may include tombstones; they are skipped. `activities` should
/// cover at least the frequency window.
pub fn compute_factors(
    project: &Project,
    tasks: &[Task],
    activities: &[Activity],
    config: &MomentumConfig,
    now: DateTime<Utc>,
) -> MomentumFactors {
    let last = last_activity(project, activities);
    MomentumFactors {
        recency: recency_factor(days_between(last, now), config.recency_half_life_days),
        completion: completion_factor(tasks, config, now),
        next_action: next_action_factor(tasks, config, now),
        frequency: frequency_factor(activities, config, now),
    }
}

/// Most recent user-driven activity, falling back to creation time.
pub fn last_activity(project: &Project, activities: &[Activity]) -> DateTime<Utc> {
    activities
        .iter()
        .filter(|activity| activity.source != ActivitySource::System)
        .map(|activity| activity.occurred_at)
        .chain(project.last_activity_at)
        .max()
        .unwrap_or(project.created_at)
}

/// Fractional days from `from` to `to`; never negative.
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / MS_PER_DAY).max(0.0)
}

/// Halves every `half_life_days` of inactivity.
pub fn recency_factor(days_inactive: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return if days_inactive <= 0.0 { 1.0 } else { 0.0 };
    }
    clamp_score((-days_inactive.max(0.0) / half_life_days * std::f64::consts::LN_2).exp())
}

fn completion_factor(tasks: &[Task], config: &MomentumConfig, now: DateTime<Utc>) -> f64 {
    if config.completion_target <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = tasks
        .iter()
        .filter(|task| !task.is_deleted && task.status == TaskStatus::Completed)
        .filter_map(|task| task.completed_at)
        .filter_map(|completed_at| tier_weight(config, days_between(completed_at, now)))
        .sum();
    clamp_score(weighted / config.completion_target)
}

fn tier_weight(config: &MomentumConfig, age_days: f64) -> Option<f64> {
    config
        .completion_tiers
        .iter()
        .find(|tier| age_days <= tier.max_age_days as f64)
        .map(|tier| tier.weight.max(0.0))
}

fn next_action_factor(tasks: &[Task], config: &MomentumConfig, now: DateTime<Utc>) -> f64 {
    let actions: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.is_actionable() && task.task_type == TaskType::Action)
        .collect();
    let flagged: Vec<&Task> = actions
        .iter()
        .copied()
        .filter(|task| task.is_next_action)
        .collect();
    let candidates = if flagged.is_empty() { actions } else { flagged };

    let Some(freshest) = candidates.iter().map(|task| task.updated_at).max() else {
        return 0.0;
    };
    let age = days_between(freshest, now);
    if age <= config.next_action_fresh_days as f64 {
        1.0
    } else if age > config.next_action_stale_days as f64 {
        0.3
    } else {
        0.7
    }
}

fn frequency_factor(activities: &[Activity], config: &MomentumConfig, now: DateTime<Utc>) -> f64 {
    let since = now - Duration::days(config.frequency_window_days.max(0));
    let count = activities
        .iter()
        .filter(|activity| activity.source != ActivitySource::System)
        .filter(|activity| activity.occurred_at >= since && activity.occurred_at <= now)
        .count();
    if count == 0 {
        return 0.0;
    }
    if config.frequency_reference == 0 {
        return 1.0;
    }
    clamp_score((1.0 + count as f64).ln() / (1.0 + f64::from(config.frequency_reference)).ln())
}

#[cfg(test)]
mod tests {
    use super::{compute_factors, days_between, last_activity, recency_factor, MomentumFactors};
    use crate::config::MomentumConfig;
    use crate::model::activity::{Activity, ActivityAction, ActivitySource, EntityType};
    use crate::model::project::Project;
    use crate::model::task::{Task, TaskStatus};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).single().expect("valid time")
    }

    fn edit(project: &Project, at: DateTime<Utc>, source: ActivitySource) -> Activity {
        Activity::new(
            EntityType::Project,
            project.id,
            Some(project.id),
            ActivityAction::Updated,
            source,
            at,
        )
    }

    #[test]
    fn recency_halves_every_half_life() {
        assert_eq!(recency_factor(0.0, 3.0), 1.0);
        assert!((recency_factor(3.0, 3.0) - 0.5).abs() < 1e-9);
        assert!((recency_factor(6.0, 3.0) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn system_activity_does_not_refresh_last_activity() {
        let created = now() - Duration::days(20);
        let project = Project::new("Quiet", created);
        let activities = vec![edit(&project, now(), ActivitySource::System)];
        assert_eq!(last_activity(&project, &activities), created);
        assert!((days_between(created, now()) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn busy_project_scores_high_and_idle_project_scores_low() {
        let config = MomentumConfig::default();
        let mut busy = Project::new("Busy", now() - Duration::days(30));
        busy.last_activity_at = Some(now());
        let mut tasks = Vec::new();
        for day in 0..5 {
            let mut task = Task::new(busy.id, format!("done {day}"), now() - Duration::days(10));
            task.set_status(TaskStatus::Completed, now() - Duration::days(day));
            tasks.push(task);
        }
        let mut next = Task::new(busy.id, "ship it", now() - Duration::hours(2));
        next.is_next_action = true;
        tasks.push(next);
        let activities: Vec<Activity> = (0..20)
            .map(|hour| edit(&busy, now() - Duration::hours(hour), ActivitySource::File))
            .collect();

        let factors = compute_factors(&busy, &tasks, &activities, &config, now());
        assert_eq!(
            factors,
            MomentumFactors {
                recency: 1.0,
                completion: 1.0,
                next_action: 1.0,
                frequency: 1.0,
            }
        );
        assert_eq!(factors.score(&config), 1.0);

        let idle = Project::new("Idle", now() - Duration::days(60));
        let idle_factors = compute_factors(&idle, &[], &[], &config, now());
        assert_eq!(idle_factors.completion, 0.0);
        assert_eq!(idle_factors.next_action, 0.0);
        assert_eq!(idle_factors.frequency, 0.0);
        assert!(idle_factors.score(&config) < 0.01);
    }

    #[test]
    fn completion_tiers_weight_older_completions_less() {
        let config = MomentumConfig::default();
        let project = Project::new("Tiers", now() - Duration::days(60));
        let mut recent = Task::new(project.id, "recent", now() - Duration::days(40));
        recent.set_status(TaskStatus::Completed, now() - Duration::days(2));
        let mut middle = Task::new(project.id, "middle", now() - Duration::days(40));
        middle.set_status(TaskStatus::Completed, now() - Duration::days(10));
        let mut old = Task::new(project.id, "old", now() - Duration::days(40));
        old.set_status(TaskStatus::Completed, now() - Duration::days(20));
        let mut ancient = Task::new(project.id, "ancient", now() - Duration::days(40));
        ancient.set_status(TaskStatus::Completed, now() - Duration::days(35));

        let factors = compute_factors(
            &project,
            &[recent, middle, old, ancient],
            &[],
            &config,
            now(),
        );
        assert!((factors.completion - 1.75 / 5.0).abs() < 1e-9);
    }

    #[test]
    fn next_action_freshness_bands() {
        let config = MomentumConfig::default();
        let project = Project::new("Bands", now() - Duration::days(60));
        let at = |days: i64| Task::new(project.id, "step", now() - Duration::days(days));

        let factor = |task: Task| {
            compute_factors(&project, &[task], &[], &config, now()).next_action
        };
        assert_eq!(factor(at(1)), 1.0);
        assert_eq!(factor(at(7)), 0.7);
        assert_eq!(factor(at(20)), 0.3);

        let mut waiting = at(1);
        waiting.set_status(TaskStatus::Waiting, now() - Duration::days(1));
        assert_eq!(factor(waiting), 0.0);
    }

    #[test]
    fn score_stays_bounded_with_odd_weights() {
        let mut config = MomentumConfig::default();
        config.weights.recency = 10.0;
        config.weights.frequency = -3.0;
        let factors = MomentumFactors {
            recency: 1.0,
            completion: 1.0,
            next_action: 1.0,
            frequency: 1.0,
        };
        assert_eq!(factors.score(&config), 1.0);

        config.weights.recency = 0.0;
        config.weights.completion = 0.0;
        config.weights.next_action = 0.0;
        config.weights.frequency = 0.0;
        let half = MomentumFactors {
            recency: 0.5,
            completion: 0.5,
            next_action: 0.5,
            frequency: 0.5,
        };
        assert_eq!(half.score(&config), 0.5);
    }

    #[test]
    fn factors_serialize_by_field_name() {
        let factors = MomentumFactors {
            recency: 0.5,
            completion: 0.25,
            next_action: 1.0,
            frequency: 0.0,
        };
        let value = serde_json::to_value(factors).expect("factors should serialize");
        assert_eq!(value["next_action"], 1.0);
        assert_eq!(value["completion"], 0.25);
    }
}
