//! Periodic momentum recomputation.
//!
//! # Responsibility
//! - Score every tracked project and persist score, trend and status.
//! - Create a restart task when a project enters `stalled`.
//! - Serve ranking and activity-retention requests with engine config.
//!
//! # Invariants
//! - One project's failure is logged and counted; it never aborts the run.
//! - Score and trend updates do not bump `updated_at`; status changes and
//!   restart tasks do, so the next push carries them into the file.
//! - Engine writes are recorded with `system` source.

use crate::config::{EngineConfig, MomentumConfig, RankingConfig};
use crate::model::activity::{Activity, ActivityAction, ActivitySource, EntityType};
use crate::model::project::{MomentumTrend, Project, ProjectId, ProjectStatus};
use crate::model::task::{Task, TaskId, TaskStatus, TaskType};
use crate::momentum::ranking::{rank_tasks, RankFilters, RankedTask};
use crate::momentum::score::{compute_factors, days_between, last_activity, MomentumFactors};
use crate::momentum::state::{classify_trend, next_status, stalled_since};
use crate::momentum::unstuck::{
    has_pending_unstuck, suggest_restart, unstuck_task, RestartSuggester,
};
use crate::repo::{
    ActivityQuery, ProjectListQuery, RepoError, RepoResult, Store, TaskListQuery,
};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::Serialize;

/// Outcome of scoring one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectScore {
    pub project_id: ProjectId,
    pub factors: MomentumFactors,
    pub score: f64,
    pub trend: MomentumTrend,
    pub previous_status: ProjectStatus,
    pub status: ProjectStatus,
    pub unstuck_task: Option<TaskId>,
    /// Whether the linked file would render differently.
    pub file_stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusTransition {
    pub project_id: ProjectId,
    pub from: ProjectStatus,
    pub to: ProjectStatus,
}

/// Totals of one [`MomentumEngine::recompute_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecomputeReport {
    pub evaluated: usize,
    pub failed: usize,
    pub transitions: Vec<StatusTransition>,
    pub unstuck_created: Vec<TaskId>,
    /// Linked projects whose file header is now out of date.
    pub changed_projects: Vec<ProjectId>,
}

pub struct MomentumEngine {
    config: MomentumConfig,
    ranking: RankingConfig,
    suggester: Option<Box<dyn RestartSuggester>>,
}

impl MomentumEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.momentum.clone(),
            ranking: config.ranking.clone(),
            suggester: None,
        }
    }

    /// Installs an external restart suggester tried before the rule-based
    /// fallback.
    pub fn with_suggester(mut self, suggester: Box<dyn RestartSuggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    pub fn config(&self) -> &MomentumConfig {
        &self.config
    }

    /// Rescores every `active`, `at_risk` and `stalled` project.
    ///
    /// # Errors
    /// - Returns an error only when the project list cannot be read.
    pub fn recompute_all<S: Store>(&self, store: &S, now: DateTime<Utc>) -> RepoResult<RecomputeReport> {
        let projects = store.list_projects(&ProjectListQuery::tracked())?;
        let mut report = RecomputeReport::default();

        for project in projects {
            let project_id = project.id;
            match self.recompute(store, project, now) {
                Ok(score) => {
                    report.evaluated += 1;
                    if score.previous_status != score.status {
                        report.transitions.push(StatusTransition {
                            project_id,
                            from: score.previous_status,
                            to: score.status,
                        });
                    }
                    report.unstuck_created.extend(score.unstuck_task);
                    if score.file_stale {
                        report.changed_projects.push(project_id);
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        "event=momentum_recompute module=momentum status=error project_id={} error={}",
                        project_id, err
                    );
                }
            }
        }

        info!(
            "event=momentum_recompute_all module=momentum status=ok evaluated={} failed={} transitions={} unstuck_created={}",
            report.evaluated,
            report.failed,
            report.transitions.len(),
            report.unstuck_created.len()
        );
        Ok(report)
    }

    /// Rescores one project by id.
    ///
    /// Projects outside the tracked statuses are scored but keep their
    /// status.
    pub fn recompute_project<S: Store>(
        &self,
        store: &S,
        project_id: ProjectId,
        now: DateTime<Utc>,
    ) -> RepoResult<ProjectScore> {
        let project = store
            .get_project(project_id)?
            .ok_or(RepoError::NotFound(project_id))?;
        self.recompute(store, project, now)
    }

    fn recompute<S: Store>(
        &self,
        store: &S,
        mut project: Project,
        now: DateTime<Utc>,
    ) -> RepoResult<ProjectScore> {
        let tasks = store.list_tasks(&TaskListQuery::for_project(project.id))?;
        let activities = store.list_activities(&ActivityQuery {
            project_id: Some(project.id),
            since: None,
        })?;

        let factors = compute_factors(&project, &tasks, &activities, &self.config, now);
        let score = factors.score(&self.config);
        let days_inactive = days_between(last_activity(&project, &activities), now);
        let previous_status = project.status;
        let status = next_status(previous_status, days_inactive, score, &self.config);
        let trend = classify_trend(project.momentum_score, score, self.config.trend_dead_zone);

        let score_changed = project.momentum_score != score;
        let status_changed = previous_status != status;
        let restart = if status == ProjectStatus::Stalled
            && status_changed
            && !has_pending_unstuck(&tasks)
        {
            let mut open: Vec<Task> = tasks
                .iter()
                .filter(|task| {
                    task.status == TaskStatus::Pending && task.task_type == TaskType::Action
                })
                .cloned()
                .collect();
            open.sort_by_key(|task| (task.created_at, task.id));
            let title = suggest_restart(self.suggester.as_deref(), &project, &open);
            Some(unstuck_task(&project, title, now))
        } else {
            None
        };

        project.previous_momentum = Some(project.momentum_score);
        project.momentum_score = score;
        project.trend = trend;
        project.stalled_since = stalled_since(previous_status, status, project.stalled_since, now);
        project.status = status;
        if status_changed || restart.is_some() {
            project.updated_at = now;
        }

        store.in_transaction(|store| -> RepoResult<()> {
            store.update_project(&project)?;
            if status_changed {
                store.append_activity(
                    &Activity::new(
                        EntityType::Project,
                        project.id,
                        Some(project.id),
                        ActivityAction::StatusChanged,
                        ActivitySource::System,
                        now,
                    )
                    .with_detail(format!("{} -> {}", previous_status.as_str(), status.as_str())),
                )?;
            }
            if let Some(task) = &restart {
                store.create_task(task)?;
                store.append_activity(
                    &Activity::new(
                        EntityType::Task,
                        task.id,
                        Some(project.id),
                        ActivityAction::Created,
                        ActivitySource::System,
                        now,
                    )
                    .with_detail("unstuck"),
                )?;
            }
            Ok(())
        })?;

        if status_changed {
            info!(
                "event=project_status module=momentum status=ok project_id={} from={} to={} score={:.3}",
                project.id,
                previous_status.as_str(),
                status.as_str(),
                score
            );
        }

        Ok(ProjectScore {
            project_id: project.id,
            factors,
            score,
            trend,
            previous_status,
            status,
            unstuck_task: restart.as_ref().map(|task| task.id),
            file_stale: project.file_path.is_some()
                && (score_changed || status_changed || restart.is_some()),
        })
    }

    /// Ranks actionable tasks with the configured tiers.
    pub fn rank<S: Store>(
        &self,
        store: &S,
        filters: &RankFilters,
        now: DateTime<Utc>,
    ) -> RepoResult<Vec<RankedTask>> {
        rank_tasks(store, filters, &self.ranking, now)
    }

    /// Drops activity older than `older_than_days`.
    ///
    /// The cutoff never reaches into the frequency window.
    pub fn prune_activity<S: Store>(
        &self,
        store: &S,
        older_than_days: i64,
        now: DateTime<Utc>,
    ) -> RepoResult<usize> {
        let days = older_than_days.max(self.config.frequency_window_days);
        let removed = store.prune_activities(now - Duration::days(days))?;
        info!(
            "event=activity_prune module=momentum status=ok older_than_days={} removed={}",
            days, removed
        );
        Ok(removed)
    }
}
