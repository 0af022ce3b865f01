//! Restart suggestions for stalled projects.
//!
//! # Responsibility
//! - Define the pluggable [`RestartSuggester`] seam for external text
//!   generation.
//! - Provide the rule-based fallback used when no collaborator answers.

use crate::model::project::Project;
use crate::model::task::{Task, TaskStatus, TaskType};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::error::Error;

pub const UNSTUCK_ESTIMATE_MINUTES: u32 = 5;

pub type SuggestResult = Result<Option<String>, Box<dyn Error + Send + Sync>>;

/// Produces the title of a small restart task for a stalled project.
///
/// `open_tasks` holds the project's pending actions, oldest first.
pub trait RestartSuggester: Send + Sync {
    fn suggest(&self, project: &Project, open_tasks: &[Task]) -> SuggestResult;
}

/// Deterministic suggester: the oldest pending action, or a generic
/// "decide the next step" prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedSuggester;

impl RuleBasedSuggester {
    pub fn suggestion(&self, project: &Project, open_tasks: &[Task]) -> String {
        match oldest_pending_action(open_tasks) {
            Some(task) => format!(
                "Spend {UNSTUCK_ESTIMATE_MINUTES} minutes on: {}",
                task.title
            ),
            None => format!(
                "Spend {UNSTUCK_ESTIMATE_MINUTES} minutes deciding the next step for {}",
                project.title
            ),
        }
    }
}

impl RestartSuggester for RuleBasedSuggester {
    fn suggest(&self, project: &Project, open_tasks: &[Task]) -> SuggestResult {
        Ok(Some(self.suggestion(project, open_tasks)))
    }
}

fn oldest_pending_action(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .filter(|task| {
            !task.is_deleted
                && !task.is_unstuck
                && task.status == TaskStatus::Pending
                && task.task_type == TaskType::Action
        })
        .min_by_key(|task| (task.created_at, task.id))
}

/// Asks `collaborator` first and falls back to the rule-based text on
/// `None`, an empty answer or an error.
pub fn suggest_restart(
    collaborator: Option<&dyn RestartSuggester>,
    project: &Project,
    open_tasks: &[Task],
) -> String {
    if let Some(collaborator) = collaborator {
        match collaborator.suggest(project, open_tasks) {
            Ok(Some(text)) if !text.trim().is_empty() => return text.trim().to_string(),
            Ok(_) => debug!(
                "event=unstuck_suggest module=momentum status=fallback project_id={} reason=empty",
                project.id
            ),
            Err(err) => warn!(
                "event=unstuck_suggest module=momentum status=fallback project_id={} error={}",
                project.id,
                crate::logging::sanitize_message(&err.to_string(), 160)
            ),
        }
    }
    RuleBasedSuggester.suggestion(project, open_tasks)
}

/// Builds the quick-win restart task.
pub fn unstuck_task(project: &Project, title: String, now: DateTime<Utc>) -> Task {
    let mut task = Task::new(project.id, title, now);
    task.is_unstuck = true;
    task.is_quick_win = true;
    task.is_next_action = true;
    task.estimated_minutes = Some(UNSTUCK_ESTIMATE_MINUTES);
    task
}

/// Whether `tasks` already holds an open unstuck task.
pub fn has_pending_unstuck(tasks: &[Task]) -> bool {
    tasks
        .iter()
        .any(|task| task.is_unstuck && !task.is_deleted && task.status.is_open())
}
