//! "What next" ranking of actionable tasks.
//!
//! # Responsibility
//! - Filter open tasks by context, energy, available time and deferral.
//! - Order the survivors by tier, then by a fixed tie-break chain.
//!
//! # Invariants
//! - Ranking is a pure function of store contents, filters and `now`.
//! - Equal inputs always produce the same order (task id breaks ties).

use crate::config::RankingConfig;
use crate::model::project::{Project, ProjectId, ProjectStatus};
use crate::model::task::{Task, TaskStatus};
use crate::repo::{
    ProjectListQuery, ProjectRepository, RepoResult, TaskListQuery, TaskRepository,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Caller constraints for a ranking request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankFilters {
    /// Tasks tagged with another context are dropped; untagged tasks pass.
    pub context: Option<String>,
    /// Tasks tagged with another energy level are dropped.
    pub energy: Option<String>,
    /// Minutes available; tasks estimated above it are dropped.
    pub time_available: Option<u32>,
    pub include_stalled: bool,
}

/// Tier 0 is the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankTier {
    Unstuck = 0,
    DueSoon = 1,
    HighMomentum = 2,
    InProgress = 3,
    MediumMomentum = 4,
    Rest = 5,
}

impl RankTier {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTask {
    pub task: Task,
    pub project_id: ProjectId,
    pub project_title: String,
    pub project_momentum: f64,
    pub tier: RankTier,
}

/// Ranks every candidate task in the store.
pub fn rank_tasks<S>(
    store: &S,
    filters: &RankFilters,
    config: &RankingConfig,
    now: DateTime<Utc>,
) -> RepoResult<Vec<RankedTask>>
where
    S: ProjectRepository + TaskRepository,
{
    let projects = store.list_projects(&ProjectListQuery::default())?;
    let tasks = store.list_tasks(&TaskListQuery {
        statuses: vec![TaskStatus::Pending, TaskStatus::InProgress],
        ..TaskListQuery::default()
    })?;
    Ok(rank_candidates(&projects, tasks, filters, config, now))
}

/// Store-free core of [`rank_tasks`].
pub fn rank_candidates(
    projects: &[Project],
    tasks: Vec<Task>,
    filters: &RankFilters,
    config: &RankingConfig,
    now: DateTime<Utc>,
) -> Vec<RankedTask> {
    let by_id: HashMap<ProjectId, &Project> =
        projects.iter().map(|project| (project.id, project)).collect();

    let mut ranked: Vec<RankedTask> = tasks
        .into_iter()
        .filter(|task| task.is_actionable())
        .filter_map(|task| {
            let project = by_id.get(&task.project_id)?;
            if !project_admits(project, &task, filters) || !task_passes(&task, filters, now) {
                return None;
            }
            let tier = tier_of(&task, project, config, now);
            Some(RankedTask {
                project_id: project.id,
                project_title: project.title.clone(),
                project_momentum: project.momentum_score,
                tier,
                task,
            })
        })
        .collect();

    ranked.sort_by(compare);
    ranked
}

fn project_admits(project: &Project, task: &Task, filters: &RankFilters) -> bool {
    match project.status {
        ProjectStatus::Archived | ProjectStatus::Completed => false,
        ProjectStatus::Stalled => filters.include_stalled || task.is_unstuck,
        ProjectStatus::Active | ProjectStatus::AtRisk | ProjectStatus::OnHold => true,
    }
}

fn task_passes(task: &Task, filters: &RankFilters, now: DateTime<Utc>) -> bool {
    if !tag_matches(filters.context.as_deref(), task.context.as_deref()) {
        return false;
    }
    if !tag_matches(filters.energy.as_deref(), task.energy.as_deref()) {
        return false;
    }
    if let (Some(available), Some(estimate)) = (filters.time_available, task.estimated_minutes) {
        if estimate > available {
            return false;
        }
    }
    task.defer_until.map_or(true, |defer| defer <= now)
}

fn tag_matches(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match (wanted, actual) {
        (Some(wanted), Some(actual)) => normalize_tag(wanted) == normalize_tag(actual),
        _ => true,
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('@').to_lowercase()
}

fn tier_of(task: &Task, project: &Project, config: &RankingConfig, now: DateTime<Utc>) -> RankTier {
    let horizon = now + Duration::days(config.due_horizon_days.max(0));
    if task.is_unstuck && project.status == ProjectStatus::Stalled {
        RankTier::Unstuck
    } else if task.due_at.map_or(false, |due| due <= horizon) {
        RankTier::DueSoon
    } else if project.momentum_score >= config.high_momentum {
        RankTier::HighMomentum
    } else if task.status == TaskStatus::InProgress {
        RankTier::InProgress
    } else if project.momentum_score >= config.medium_momentum {
        RankTier::MediumMomentum
    } else {
        RankTier::Rest
    }
}

fn compare(left: &RankedTask, right: &RankedTask) -> Ordering {
    left.tier
        .cmp(&right.tier)
        .then_with(|| right.project_momentum.total_cmp(&left.project_momentum))
        .then_with(|| none_last(left.task.priority, right.task.priority))
        .then_with(|| none_last(left.task.due_at, right.task.due_at))
        .then_with(|| left.task.id.cmp(&right.task.id))
}

fn none_last<T: Ord>(left: Option<T>, right: Option<T>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::{rank_candidates, RankFilters, RankTier};
    use crate::config::RankingConfig;
    use crate::model::project::{Project, ProjectStatus};
    use crate::model::task::{Task, TaskStatus};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).single().expect("valid time")
    }

    fn project(title: &str, status: ProjectStatus, momentum: f64) -> Project {
        let mut project = Project::new(title, now() - Duration::days(30));
        project.status = status;
        project.momentum_score = momentum;
        project
    }

    #[test]
    fn tiers_follow_urgency_order() {
        let stalled = project("Stalled", ProjectStatus::Stalled, 0.1);
        let hot = project("Hot", ProjectStatus::Active, 0.9);
        let warm = project("Warm", ProjectStatus::Active, 0.5);
        let cold = project("Cold", ProjectStatus::AtRisk, 0.1);

        let mut unstuck = Task::new(stalled.id, "five minutes", now());
        unstuck.is_unstuck = true;
        let mut due = Task::new(cold.id, "file taxes", now());
        due.due_at = Some(now() + Duration::days(1));
        let hot_task = Task::new(hot.id, "ship", now());
        let mut started = Task::new(cold.id, "draft", now());
        started.set_status(TaskStatus::InProgress, now());
        let warm_task = Task::new(warm.id, "polish", now());
        let cold_task = Task::new(cold.id, "someday-ish", now());

        let ranked = rank_candidates(
            &[stalled, hot, warm, cold],
            vec![cold_task, warm_task, started, hot_task, due, unstuck],
            &RankFilters::default(),
            &RankingConfig::default(),
            now(),
        );
        let tiers: Vec<RankTier> = ranked.iter().map(|item| item.tier).collect();
        assert_eq!(
            tiers,
            vec![
                RankTier::Unstuck,
                RankTier::DueSoon,
                RankTier::HighMomentum,
                RankTier::InProgress,
                RankTier::MediumMomentum,
                RankTier::Rest,
            ]
        );
    }

    #[test]
    fn stalled_projects_only_surface_unstuck_tasks_by_default() {
        let stalled = project("Stalled", ProjectStatus::Stalled, 0.1);
        let plain = Task::new(stalled.id, "old action", now());
        let mut unstuck = Task::new(stalled.id, "five minutes", now());
        unstuck.is_unstuck = true;
        let tasks = vec![plain, unstuck];

        let default = rank_candidates(
            std::slice::from_ref(&stalled),
            tasks.clone(),
            &RankFilters::default(),
            &RankingConfig::default(),
            now(),
        );
        assert_eq!(default.len(), 1);
        assert!(default[0].task.is_unstuck);

        let everything = rank_candidates(
            std::slice::from_ref(&stalled),
            tasks,
            &RankFilters {
                include_stalled: true,
                ..RankFilters::default()
            },
            &RankingConfig::default(),
            now(),
        );
        assert_eq!(everything.len(), 2);
    }

    #[test]
    fn filters_drop_mismatches_and_deferred_tasks() {
        let active = project("Errands", ProjectStatus::Active, 0.5);
        let mut office = Task::new(active.id, "print forms", now());
        office.context = Some("@office".to_string());
        let mut home = Task::new(active.id, "water plants", now());
        home.context = Some("home".to_string());
        let mut long = Task::new(active.id, "deep clean", now());
        long.estimated_minutes = Some(120);
        let mut deferred = Task::new(active.id, "renew passport", now());
        deferred.defer_until = Some(now() + Duration::days(10));
        let mut tired = Task::new(active.id, "refactor budget", now());
        tired.energy = Some("high".to_string());
        let untagged = Task::new(active.id, "call mom", now());

        let ranked = rank_candidates(
            std::slice::from_ref(&active),
            vec![office, home, long, deferred, tired, untagged],
            &RankFilters {
                context: Some("Home".to_string()),
                energy: Some("low".to_string()),
                time_available: Some(30),
                include_stalled: false,
            },
            &RankingConfig::default(),
            now(),
        );
        let titles: Vec<&str> = ranked.iter().map(|item| item.task.title.as_str()).collect();
        assert_eq!(titles.len(), 2);
        assert!(titles.contains(&"water plants"));
        assert!(titles.contains(&"call mom"));
    }

    #[test]
    fn tie_breaks_are_deterministic() {
        let a = project("A", ProjectStatus::Active, 0.5);
        let b = project("B", ProjectStatus::Active, 0.6);
        let mut urgent = Task::new(a.id, "p1", now());
        urgent.priority = Some(1);
        let mut later = Task::new(a.id, "p3", now());
        later.priority = Some(3);
        let unprioritized = Task::new(a.id, "none", now());
        let mut first_id = Task::new(a.id, "same-1", now());
        let mut second_id = Task::new(a.id, "same-2", now());
        first_id.priority = Some(4);
        second_id.priority = Some(4);
        if first_id.id > second_id.id {
            std::mem::swap(&mut first_id.id, &mut second_id.id);
        }
        let from_b = Task::new(b.id, "momentum wins", now());
        let expected = vec![
            "momentum wins",
            "p1",
            "p3",
            first_id.title.as_str(),
            second_id.title.as_str(),
            "none",
        ]
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

        let tasks = vec![
            unprioritized.clone(),
            second_id.clone(),
            later.clone(),
            from_b.clone(),
            first_id.clone(),
            urgent.clone(),
        ];
        let projects = [a, b];
        for _ in 0..3 {
            let ranked = rank_candidates(
                &projects,
                tasks.clone(),
                &RankFilters::default(),
                &RankingConfig::default(),
                now(),
            );
            let titles: Vec<String> = ranked.into_iter().map(|item| item.task.title).collect();
            assert_eq!(titles, expected);
        }
    }
}
