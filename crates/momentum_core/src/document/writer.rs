//! Regenerates a project document from canonical records.
//!
//! # Responsibility
//! - Apply store state onto existing text with the smallest possible edit.
//! - Assign markers to tasks that do not have one yet.
//!
//! # Invariants
//! - Prose, unknown header keys and untouched item lines survive verbatim.
//! - Existing marker comments are never rewritten.
//! - New markers are unique within the document and the project.

use crate::document::marker::{find_marker, generate_marker, marker_comment, strip_markers};
use crate::document::parser::{parse_document, split_lines, CheckState, ParsedDocument};
use crate::model::project::{Project, ProjectStatus};
use crate::model::task::{Task, TaskId, TaskStatus, TaskType};
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};

static TOP_LEVEL_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<key>[A-Za-z_][A-Za-z0-9_.-]*)\s*:").expect("valid key regex"));

const SECTION_ORDER: [TaskType; 3] = [TaskType::Action, TaskType::WaitingFor, TaskType::Someday];

/// Output of [`render_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub content: String,
    /// Markers generated during this render, to be persisted by the caller.
    pub assigned_markers: Vec<(TaskId, String)>,
    /// Zero-based line of every rendered task.
    pub line_offsets: Vec<(TaskId, usize)>,
}

impl RenderedDocument {
    pub fn marker_for(&self, task_id: TaskId) -> Option<&str> {
        self.assigned_markers
            .iter()
            .find(|(id, _)| *id == task_id)
            .map(|(_, marker)| marker.as_str())
    }

    pub fn line_of(&self, task_id: TaskId) -> Option<usize> {
        self.line_offsets
            .iter()
            .find(|(id, _)| *id == task_id)
            .map(|(_, line)| *line)
    }
}

/// Renders `project` and its `tasks` onto `existing` text.
///
/// `tasks` should include tombstoned tasks so their lines can be removed
/// and their markers stay reserved.
pub fn render_document(
    project: &Project,
    area_name: Option<&str>,
    tasks: &[Task],
    existing: Option<&str>,
    now: DateTime<Utc>,
) -> RenderedDocument {
    let existing_text = existing.unwrap_or_default();
    let is_new = existing.map_or(true, |text| text.trim().is_empty());
    let parsed = parse_document(existing_text);
    let without_bom = existing_text
        .strip_prefix('\u{feff}')
        .unwrap_or(existing_text);
    let lines: Vec<String> = split_lines(without_bom)
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut taken: HashSet<String> = parsed.markers();
    taken.extend(tasks.iter().filter_map(|task| task.marker.clone()));

    let mut assigned_markers = Vec::new();
    let mut plan = BodyPlan::new(lines.len());
    let mut claimed_lines: HashSet<usize> = HashSet::new();
    let mut pending_new: Vec<(&Task, String)> = Vec::new();

    for task in tasks {
        if task.is_deleted {
            if let Some(item) = task.marker.as_deref().and_then(|m| parsed.item_by_marker(m)) {
                plan.remove(item.line);
            }
            continue;
        }

        let title = sanitize_title(&task.title);
        let state = check_state(task.status);

        if let Some(item) = task.marker.as_deref().and_then(|m| parsed.item_by_marker(m)) {
            claimed_lines.insert(item.line);
            if !item_matches(item.state, &item.title, state, &title) {
                let comment = find_comment(&lines[item.line]).unwrap_or_else(|| {
                    marker_comment(task.marker.as_deref().unwrap_or_default(), task.task_type)
                });
                plan.replace(
                    item.line,
                    format_item(&item.indent, item.bullet, state, &title, &comment),
                    task.id,
                );
            } else {
                plan.own(item.line, task.id);
            }
            continue;
        }

        let marker = match &task.marker {
            Some(marker) => marker.clone(),
            None => {
                let marker = generate_marker(&taken);
                taken.insert(marker.clone());
                assigned_markers.push((task.id, marker.clone()));
                marker
            }
        };

        let adopted = task
            .line_hint
            .map(|hint| hint as usize)
            .filter(|line| !claimed_lines.contains(line))
            .and_then(|line| parsed.item_at_line(line))
            .filter(|item| item.marker.is_none() && item.title == title);

        match adopted {
            Some(item) => {
                claimed_lines.insert(item.line);
                let comment = marker_comment(&marker, task.task_type);
                let rendered = if item_matches(item.state, &item.title, state, &title) {
                    format!("{} {}", strip_markers(&lines[item.line]).trim_end(), comment)
                } else {
                    format_item(&item.indent, item.bullet, state, &title, &comment)
                };
                plan.replace(item.line, rendered, task.id);
            }
            None => pending_new.push((task, marker)),
        }
    }

    let mut appended: BTreeMap<usize, Vec<(String, TaskId)>> = BTreeMap::new();
    for (task, marker) in pending_new {
        let line = format_item(
            "",
            '-',
            check_state(task.status),
            &sanitize_title(&task.title),
            &marker_comment(&marker, task.task_type),
        );
        match insertion_point(&parsed, task.task_type) {
            Some(anchor) => plan.insert_after(anchor, line, task.id),
            None => appended
                .entry(section_rank(task.task_type))
                .or_default()
                .push((line, task.id)),
        }
    }

    let mut header = render_header(project, area_name, &parsed, &lines, is_new, now);
    let body_lines = &lines[parsed.body_start.min(lines.len())..];

    let mut out: Vec<(String, Option<TaskId>)> = Vec::new();
    out.append(&mut header);

    let title_fix = title_rewrite(project, &parsed, is_new);
    if is_new {
        out.push((format!("# {}", sanitize_title(&project.title)), None));
    }

    for (offset, original) in body_lines.iter().enumerate() {
        let index = parsed.body_start + offset;
        match &title_fix {
            Some((line, text)) if *line == index => out.push((text.clone(), None)),
            _ => plan.emit(index, original, &mut out),
        }
    }

    for (rank, entries) in appended {
        if out.last().map_or(false, |(line, _)| !line.trim().is_empty()) {
            out.push((String::new(), None));
        }
        out.push((format!("## {}", SECTION_ORDER[rank].section_heading()), None));
        out.extend(entries.into_iter().map(|(line, id)| (line, Some(id))));
    }

    let line_offsets = out
        .iter()
        .enumerate()
        .filter_map(|(index, (_, owner))| owner.map(|id| (id, index)))
        .collect();
    let mut content = out
        .into_iter()
        .map(|(line, _)| line)
        .collect::<Vec<_>>()
        .join("\n");
    content.push('\n');

    RenderedDocument {
        content,
        assigned_markers,
        line_offsets,
    }
}

/// Per-line edits to the existing body.
struct BodyPlan {
    replacements: HashMap<usize, (String, TaskId)>,
    owners: HashMap<usize, TaskId>,
    removals: HashSet<usize>,
    insertions: HashMap<usize, Vec<(String, TaskId)>>,
    len: usize,
}

impl BodyPlan {
    fn new(len: usize) -> Self {
        Self {
            replacements: HashMap::new(),
            owners: HashMap::new(),
            removals: HashSet::new(),
            insertions: HashMap::new(),
            len,
        }
    }

    fn replace(&mut self, line: usize, text: String, owner: TaskId) {
        self.replacements.insert(line, (text, owner));
    }

    fn own(&mut self, line: usize, owner: TaskId) {
        self.owners.insert(line, owner);
    }

    fn remove(&mut self, line: usize) {
        self.removals.insert(line);
    }

    fn insert_after(&mut self, line: usize, text: String, owner: TaskId) {
        let anchor = line.min(self.len.saturating_sub(1));
        self.insertions.entry(anchor).or_default().push((text, owner));
    }

    fn emit(&self, index: usize, original: &str, out: &mut Vec<(String, Option<TaskId>)>) {
        if !self.removals.contains(&index) {
            match self.replacements.get(&index) {
                Some((text, owner)) => out.push((text.clone(), Some(*owner))),
                None => out.push((original.to_string(), self.owners.get(&index).copied())),
            }
        }
        if let Some(inserted) = self.insertions.get(&index) {
            out.extend(inserted.iter().map(|(text, owner)| (text.clone(), Some(*owner))));
        }
    }
}

fn check_state(status: TaskStatus) -> CheckState {
    match status {
        TaskStatus::Completed => CheckState::Done,
        TaskStatus::Cancelled => CheckState::Cancelled,
        _ => CheckState::Open,
    }
}

fn item_matches(current: CheckState, current_title: &str, state: CheckState, title: &str) -> bool {
    current == state && current_title == title
}

fn format_item(indent: &str, bullet: char, state: CheckState, title: &str, comment: &str) -> String {
    format!("{indent}{bullet} [{}] {title} {comment}", state.as_char())
}

fn find_comment(line: &str) -> Option<String> {
    find_marker(line).map(|marker| marker.raw)
}

/// Removes line breaks and comment delimiters, collapses whitespace.
pub fn sanitize_title(title: &str) -> String {
    title
        .replace("<!--", "")
        .replace("-->", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn section_rank(task_type: TaskType) -> usize {
    SECTION_ORDER
        .iter()
        .position(|candidate| *candidate == task_type)
        .unwrap_or(0)
}

/// Line after which a new item of `task_type` goes, if a section exists.
fn insertion_point(parsed: &ParsedDocument, task_type: TaskType) -> Option<usize> {
    let section_index = parsed
        .sections
        .iter()
        .rposition(|section| section.task_type == Some(task_type))?;
    let last_item = parsed
        .items
        .iter()
        .filter(|item| item.section == Some(section_index))
        .map(|item| item.line)
        .max();
    Some(last_item.unwrap_or(parsed.sections[section_index].line))
}

fn title_rewrite(project: &Project, parsed: &ParsedDocument, is_new: bool) -> Option<(usize, String)> {
    if is_new || parsed.header.title.is_some() {
        return None;
    }
    let line = parsed.title_line?;
    let title = sanitize_title(&project.title);
    (parsed.title.as_deref() != Some(title.as_str())).then(|| (line, format!("# {title}")))
}

/// System-owned header values for `project`, in canonical order.
fn system_values(
    project: &Project,
    area_name: Option<&str>,
    include_title: bool,
) -> Vec<(&'static str, String)> {
    let mut values = vec![
        ("external_id", project.header_id()),
        ("status", project.status.as_str().to_string()),
    ];
    if let Some(priority) = project.priority {
        values.push(("priority", priority.to_string()));
    }
    values.push(("momentum_score", format_score(project.momentum_score)));
    if let Some(area) = area_name {
        values.push(("area", area.to_string()));
    }
    if include_title {
        values.push(("title", sanitize_title(&project.title)));
    }
    values
}

fn format_score(score: f64) -> String {
    let rounded = (score * 1000.0).round() / 1000.0;
    format!("{rounded}")
}

fn render_header(
    project: &Project,
    area_name: Option<&str>,
    parsed: &ParsedDocument,
    lines: &[String],
    is_new: bool,
    now: DateTime<Utc>,
) -> Vec<(String, Option<TaskId>)> {
    let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);

    let Some(span) = parsed.header_span else {
        if !is_new {
            return Vec::new();
        }
        let mut out = vec![("---".to_string(), None)];
        out.extend(
            system_values(project, area_name, false)
                .into_iter()
                .map(|(key, value)| (format!("{key}: {value}"), None)),
        );
        out.push((format!("last_synced: {stamp}"), None));
        out.push(("---".to_string(), None));
        return out;
    };

    let wanted = system_values(project, area_name, parsed.header.title.is_some());
    let mut seen: HashSet<&str> = HashSet::new();
    let mut changed = false;
    let mut last_synced_line = None;
    let mut out: Vec<(String, Option<TaskId>)> = Vec::new();

    for line in &lines[span.open_line..span.close_line] {
        let key = TOP_LEVEL_KEY_RE
            .captures(line)
            .map(|caps| caps["key"].to_ascii_lowercase());
        let Some(key) = key else {
            out.push((line.clone(), None));
            continue;
        };
        if key == "last_synced" {
            last_synced_line = Some(out.len());
            out.push((line.clone(), None));
            continue;
        }
        match wanted.iter().find(|(name, _)| *name == key) {
            Some((name, value)) => {
                seen.insert(*name);
                let rewritten = format!("{name}: {value}");
                if !same_value(name, &current_value(line), value) {
                    changed = true;
                    out.push((rewritten, None));
                } else {
                    out.push((line.clone(), None));
                }
            }
            None => out.push((line.clone(), None)),
        }
    }

    for (name, value) in &wanted {
        if !seen.contains(name) {
            changed = true;
            out.push((format!("{name}: {value}"), None));
        }
    }

    if changed {
        let stamped = format!("last_synced: {stamp}");
        match last_synced_line {
            Some(index) => out[index].0 = stamped,
            None => out.push((stamped, None)),
        }
    }
    out.push((lines[span.close_line].clone(), None));
    out
}

/// Spelling differences (`0.50` vs `0.5`, `Active` vs `active`) are not
/// changes.
fn same_value(name: &str, current: &str, wanted: &str) -> bool {
    match name {
        "momentum_score" => match (current.parse::<f64>(), wanted.parse::<f64>()) {
            (Ok(current), Ok(wanted)) => (current - wanted).abs() < 0.0005,
            _ => current == wanted,
        },
        "status" => ProjectStatus::parse(current).map(ProjectStatus::as_str) == Some(wanted),
        "external_id" => current.eq_ignore_ascii_case(wanted),
        _ => current == wanted,
    }
}

fn current_value(line: &str) -> String {
    line.split_once(':')
        .map(|(_, value)| {
            let value = value.trim();
            value
                .strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
                .unwrap_or(value)
                .to_string()
        })
        .unwrap_or_default()
}
