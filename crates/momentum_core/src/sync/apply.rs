//! Applies a parsed document onto the store.
//!
//! # Invariants
//! - Tasks are matched by marker first; titles only adopt unmarked lines.
//! - A task is tombstoned only after it has been placed in the file once
//!   (`line_hint` set), so store-side tasks awaiting a push survive.
//! - Every semantic change appends one `file`-sourced activity.

use crate::document::marker::generate_marker;
use crate::document::parser::{CheckState, ParseIssue, ParsedDocument, ParsedItem};
use crate::model::activity::{Activity, ActivityAction, ActivitySource, EntityType};
use crate::model::area::Area;
use crate::model::project::{clamp_score, Project, ProjectId, ProjectStatus};
use crate::model::task::{Task, TaskStatus, TaskType};
use crate::repo::{Store, TaskListQuery};
use crate::sync::SyncError;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

/// Counts reported for one applied pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSummary {
    pub project_id: ProjectId,
    pub project_created: bool,
    pub tasks_created: usize,
    pub tasks_updated: usize,
    pub tasks_deleted: usize,
    /// Markers written back into the file right after the pull.
    pub markers_stamped: usize,
    pub issues: Vec<ParseIssue>,
}

pub(crate) struct Applied {
    pub summary: PullSummary,
    /// Some lines lack their marker comment in the file.
    pub needs_stamp: bool,
}

pub(crate) struct ApplyInput<'a> {
    pub key: &'a str,
    pub doc: &'a ParsedDocument,
    pub fingerprint: &'a str,
    pub project: Option<Project>,
    pub now: DateTime<Utc>,
}

pub(crate) fn apply_document<S: Store>(store: &S, input: ApplyInput<'_>) -> Result<Applied, SyncError> {
    let ApplyInput {
        key,
        doc,
        fingerprint,
        project,
        now,
    } = input;

    let area_id = resolve_area(store, key, doc, now)?;
    let (mut project, project_created) = match project {
        Some(project) => (project, false),
        None => (create_project(store, key, doc, area_id, now)?, true),
    };
    let mut project_changed = project_created;
    if !project_created {
        project_changed = merge_project(store, &mut project, key, doc, area_id, now)?;
    }

    let mut summary = PullSummary {
        project_id: project.id,
        project_created,
        tasks_created: 0,
        tasks_updated: 0,
        tasks_deleted: 0,
        markers_stamped: 0,
        issues: doc.issues.clone(),
    };
    let mut needs_stamp = false;

    let mut existing = store.list_tasks(&TaskListQuery {
        include_deleted: true,
        ..TaskListQuery::for_project(project.id)
    })?;
    let doc_markers = doc.markers();
    let mut taken: HashSet<String> = doc_markers.clone();
    taken.extend(existing.iter().filter_map(|task| task.marker.clone()));
    let by_marker: HashMap<String, usize> = existing
        .iter()
        .enumerate()
        .filter_map(|(index, task)| task.marker.clone().map(|marker| (marker, index)))
        .collect();
    let mut matched: HashSet<usize> = HashSet::new();

    for item in &doc.items {
        let found = match &item.marker {
            Some(marker) => by_marker.get(marker).copied(),
            None => adoption_candidate(&existing, &matched, &doc_markers, item),
        };

        match found {
            Some(index) => {
                matched.insert(index);
                let task = &mut existing[index];
                if item.marker.is_none() {
                    needs_stamp = true;
                    if task.marker.is_none() {
                        let marker = generate_marker(&taken);
                        taken.insert(marker.clone());
                        task.marker = Some(marker);
                    }
                }
                let changes = merge_item(task, item, now);
                store.update_task(task)?;
                if !changes.is_empty() {
                    summary.tasks_updated += 1;
                    for (action, detail) in changes {
                        append(store, EntityType::Task, task.id, Some(project.id), action, detail, now)?;
                    }
                }
            }
            None => {
                let marker = match &item.marker {
                    Some(marker) => marker.clone(),
                    None => {
                        needs_stamp = true;
                        let marker = generate_marker(&taken);
                        taken.insert(marker.clone());
                        marker
                    }
                };
                let task = task_from_item(project.id, item, marker, now);
                store.create_task(&task)?;
                summary.tasks_created += 1;
                append(
                    store,
                    EntityType::Task,
                    task.id,
                    Some(project.id),
                    ActivityAction::Created,
                    Some(task.title.clone()),
                    now,
                )?;
            }
        }
    }

    for (index, task) in existing.iter().enumerate() {
        if matched.contains(&index) || task.is_deleted || task.line_hint.is_none() {
            continue;
        }
        store.soft_delete_task(task.id, now)?;
        summary.tasks_deleted += 1;
        append(
            store,
            EntityType::Task,
            task.id,
            Some(project.id),
            ActivityAction::Deleted,
            Some(task.title.clone()),
            now,
        )?;
    }

    if project_changed || summary.tasks_created + summary.tasks_updated + summary.tasks_deleted > 0
    {
        project.touch(now);
    }
    project.content_fingerprint = Some(fingerprint.to_string());
    store.update_project(&project)?;

    debug!(
        "event=pull_apply module=sync status=ok project={} created={} updated={} deleted={} issues={}",
        project.id,
        summary.tasks_created,
        summary.tasks_updated,
        summary.tasks_deleted,
        summary.issues.len()
    );
    Ok(Applied {
        summary,
        needs_stamp,
    })
}

/// Picks an unplaced store task with the same title, nearest line first.
fn adoption_candidate(
    existing: &[Task],
    matched: &HashSet<usize>,
    doc_markers: &HashSet<String>,
    item: &ParsedItem,
) -> Option<usize> {
    existing
        .iter()
        .enumerate()
        .filter(|(index, task)| {
            !matched.contains(index)
                && !task.is_deleted
                && task.title == item.title
                && task
                    .marker
                    .as_ref()
                    .map_or(true, |marker| !doc_markers.contains(marker))
        })
        .min_by_key(|(_, task)| {
            task.line_hint
                .map_or(usize::MAX, |hint| (hint as usize).abs_diff(item.line))
        })
        .map(|(index, _)| index)
}

/// Store status implied by a checkbox, given the task's current status.
pub(crate) fn status_from_item(state: CheckState, current: TaskStatus, task_type: TaskType) -> TaskStatus {
    match state {
        CheckState::Done => TaskStatus::Completed,
        CheckState::Cancelled => TaskStatus::Cancelled,
        CheckState::Open if current.is_open() => current,
        CheckState::Open if task_type == TaskType::WaitingFor => TaskStatus::Waiting,
        CheckState::Open => TaskStatus::Pending,
    }
}

fn merge_item(
    task: &mut Task,
    item: &ParsedItem,
    now: DateTime<Utc>,
) -> Vec<(ActivityAction, Option<String>)> {
    let mut changes = Vec::new();

    if task.is_deleted {
        task.is_deleted = false;
        changes.push((ActivityAction::Updated, Some("restored".to_string())));
    }
    if task.title != item.title {
        let detail = format!("{} -> {}", task.title, item.title);
        task.title = item.title.clone();
        changes.push((ActivityAction::Renamed, Some(detail)));
    }
    if task.task_type != item.task_type {
        task.task_type = item.task_type;
        changes.push((
            ActivityAction::Updated,
            Some(format!("type={}", item.task_type.as_str())),
        ));
    }

    let previous = task.status;
    let next = status_from_item(item.state, previous, task.task_type);
    if task.set_status(next, now) {
        let action = if next == TaskStatus::Completed {
            ActivityAction::Completed
        } else if !previous.is_open() && next.is_open() {
            ActivityAction::Reopened
        } else {
            ActivityAction::StatusChanged
        };
        changes.push((
            action,
            Some(format!("{} -> {}", previous.as_str(), next.as_str())),
        ));
    }

    task.line_hint = u32::try_from(item.line).ok();
    if !changes.is_empty() {
        task.updated_at = now;
    }
    changes
}

fn task_from_item(project_id: ProjectId, item: &ParsedItem, marker: String, now: DateTime<Utc>) -> Task {
    let mut task = Task::new(project_id, item.title.clone(), now);
    task.task_type = item.task_type;
    task.marker = Some(marker);
    task.line_hint = u32::try_from(item.line).ok();
    let status = status_from_item(item.state, TaskStatus::Pending, item.task_type);
    let status = if status == TaskStatus::Pending && item.task_type == TaskType::WaitingFor {
        TaskStatus::Waiting
    } else {
        status
    };
    task.set_status(status, now);
    task
}

fn create_project<S: Store>(
    store: &S,
    key: &str,
    doc: &ParsedDocument,
    area_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<Project, SyncError> {
    let title = doc.title.clone().unwrap_or_else(|| file_stem(key));
    let header_id = header_external_id(doc);
    let requested_id = header_id.and_then(|raw| Uuid::parse_str(raw).ok());
    let mut project = match requested_id {
        Some(id) if store.get_project(id)?.is_none() => Project::with_id(id, title, now),
        _ => Project::new(title, now),
    };
    if let Some(raw) = header_id.filter(|raw| Uuid::parse_str(raw).ok() != Some(project.id)) {
        if external_id_is_free(store, raw, project.id)? {
            project.external_id = Some(raw.to_string());
        }
    }
    project.status = doc.header.status.unwrap_or(ProjectStatus::Active);
    project.priority = doc.header.priority;
    project.momentum_score = doc.header.momentum_score.map_or(0.0, clamp_score);
    project.file_path = Some(key.to_string());
    project.area_id = area_id;
    project.last_activity_at = Some(now);
    store.create_project(&project)?;
    append(
        store,
        EntityType::Project,
        project.id,
        Some(project.id),
        ActivityAction::Created,
        Some(project.title.clone()),
        now,
    )?;
    Ok(project)
}

fn merge_project<S: Store>(
    store: &S,
    project: &mut Project,
    key: &str,
    doc: &ParsedDocument,
    area_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<bool, SyncError> {
    let mut changes: Vec<(ActivityAction, Option<String>)> = Vec::new();

    if let Some(title) = doc.title.as_ref().filter(|title| **title != project.title) {
        changes.push((
            ActivityAction::Renamed,
            Some(format!("{} -> {}", project.title, title)),
        ));
        project.title = title.clone();
    }
    if let Some(status) = doc.header.status.filter(|status| *status != project.status) {
        changes.push((
            ActivityAction::StatusChanged,
            Some(format!("{} -> {}", project.status.as_str(), status.as_str())),
        ));
        if status != ProjectStatus::Stalled {
            project.stalled_since = None;
        }
        project.status = status;
    }
    if doc.header.priority.is_some() && doc.header.priority != project.priority {
        project.priority = doc.header.priority;
        changes.push((ActivityAction::Updated, Some("priority".to_string())));
    }
    if area_id.is_some() && area_id != project.area_id {
        project.area_id = area_id;
        changes.push((ActivityAction::Updated, Some("area".to_string())));
    }
    if let Some(raw) = header_external_id(doc) {
        let adopt = raw != project.header_id()
            && Uuid::parse_str(raw).ok() != Some(project.id)
            && external_id_is_free(store, raw, project.id)?;
        if adopt {
            project.external_id = Some(raw.to_string());
            changes.push((ActivityAction::Updated, Some("external_id".to_string())));
        }
    }
    if project.file_path.as_deref() != Some(key) {
        if let Some(previous) = &project.file_path {
            warn!(
                "event=project_relink module=sync status=ok project={} from={} to={}",
                project.id, previous, key
            );
        }
        project.file_path = Some(key.to_string());
    }

    if changes.is_empty() {
        return Ok(false);
    }
    project.updated_at = now;
    for (action, detail) in changes {
        append(
            store,
            EntityType::Project,
            project.id,
            Some(project.id),
            action,
            detail,
            now,
        )?;
    }
    Ok(true)
}

fn header_external_id(doc: &ParsedDocument) -> Option<&str> {
    doc.header
        .external_id
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
}

/// No other project answers to `raw`, neither as its header id nor its uuid.
fn external_id_is_free<S: Store>(store: &S, raw: &str, owner: ProjectId) -> Result<bool, SyncError> {
    if let Some(other) = store.find_project_by_external_id(raw)? {
        if other.id != owner {
            return Ok(false);
        }
    }
    match Uuid::parse_str(raw) {
        Ok(id) if id != owner => Ok(store.get_project(id)?.is_none()),
        _ => Ok(true),
    }
}

/// Area named in the header, else the registered folder containing the file.
fn resolve_area<S: Store>(
    store: &S,
    key: &str,
    doc: &ParsedDocument,
    now: DateTime<Utc>,
) -> Result<Option<Uuid>, SyncError> {
    if let Some(name) = doc.header.area.as_deref() {
        if let Some(area) = store.find_area_by_name(name)? {
            return Ok(Some(area.id));
        }
        let area = Area::new(name, now);
        store.create_area(&area)?;
        append(
            store,
            EntityType::Area,
            area.id,
            None,
            ActivityAction::Created,
            Some(area.name.clone()),
            now,
        )?;
        return Ok(Some(area.id));
    }

    let path = Path::new(key);
    let area = store
        .list_areas()?
        .into_iter()
        .filter(|area| {
            area.folder_path
                .as_deref()
                .map_or(false, |folder| path.starts_with(folder))
        })
        .max_by_key(|area| area.folder_path.as_ref().map_or(0, String::len));
    Ok(area.map(|area| area.id))
}

fn file_stem(key: &str) -> String {
    Path::new(key)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| key.to_string())
}

pub(crate) fn append<S: Store>(
    store: &S,
    entity_type: EntityType,
    entity_id: Uuid,
    project_id: Option<ProjectId>,
    action: ActivityAction,
    detail: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let mut activity = Activity::new(
        entity_type,
        entity_id,
        project_id,
        action,
        ActivitySource::File,
        now,
    );
    activity.detail = detail;
    store.append_activity(&activity)?;
    Ok(())
}
