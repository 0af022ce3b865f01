//! Permissive parser for tracked project documents.
//!
//! # Responsibility
//! - Split the optional `---` header block from the body.
//! - Extract system header keys, phase lists and checkbox items.
//!
//! # Invariants
//! - Never fails; malformed input degrades and is reported as issues.
//! - Every item carries its zero-based line offset in the whole document.
//! - A marker token is owned by the first item carrying it.

use crate::document::marker::{find_marker, strip_markers};
use crate::model::project::{ProjectStatus, PRIORITY_MAX, PRIORITY_MIN};
use crate::model::task::TaskType;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static HEADER_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<key>[A-Za-z_][A-Za-z0-9_.-]*)\s*:\s*(?P<value>.*)$")
        .expect("valid header key regex")
});

static ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<indent>\s*)(?P<bullet>[-*+])\s+\[(?P<state>[ xX-])\](?P<rest>.*)$")
        .expect("valid checkbox item regex")
});

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<hashes>#{1,6})\s+(?P<text>.*?)\s*#*\s*$").expect("valid heading regex"));

const HEADER_DELIMITER: &str = "---";

/// Checkbox state of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Open,
    Done,
    Cancelled,
}

impl CheckState {
    fn from_char(value: char) -> Self {
        match value {
            'x' | 'X' => Self::Done,
            '-' => Self::Cancelled,
            _ => Self::Open,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Open => ' ',
            Self::Done => 'x',
            Self::Cancelled => '-',
        }
    }
}

/// One entry of the `phases:` header list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    pub status: Option<String>,
}

/// Values extracted from the header block.
///
/// Out-of-domain values are dropped here and reported as issues.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentHeader {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub status: Option<ProjectStatus>,
    pub priority: Option<i64>,
    pub momentum_score: Option<f64>,
    pub area: Option<String>,
    pub last_synced: Option<String>,
    pub phases: Vec<Phase>,
    /// Non-system keys, in file order.
    pub extra: Vec<(String, String)>,
}

/// Line range of the header block, delimiters included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSpan {
    pub open_line: usize,
    pub close_line: usize,
}

/// A heading in the body and the item type it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    pub level: usize,
    pub line: usize,
    /// `None` when the heading names no known list.
    pub task_type: Option<TaskType>,
}

/// A checkbox line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub line: usize,
    pub indent: String,
    pub bullet: char,
    pub state: CheckState,
    pub title: String,
    pub marker: Option<String>,
    /// Marker token that lost to an earlier item with the same token.
    pub duplicate_marker: Option<String>,
    pub marker_type: Option<TaskType>,
    /// Index into [`ParsedDocument::sections`].
    pub section: Option<usize>,
    pub task_type: TaskType,
}

/// A non-fatal problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub line: Option<usize>,
    pub message: String,
}

impl ParseIssue {
    fn at(line: usize, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            message: message.into(),
        }
    }
}

/// Result of [`parse_document`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub header: DocumentHeader,
    pub header_span: Option<HeaderSpan>,
    /// Header title, else the first `# ` heading.
    pub title: Option<String>,
    pub title_line: Option<usize>,
    pub items: Vec<ParsedItem>,
    pub sections: Vec<Section>,
    pub issues: Vec<ParseIssue>,
    /// First line after the header block.
    pub body_start: usize,
}

impl ParsedDocument {
    pub fn item_by_marker(&self, marker: &str) -> Option<&ParsedItem> {
        self.items
            .iter()
            .find(|item| item.marker.as_deref() == Some(marker))
    }

    pub fn item_at_line(&self, line: usize) -> Option<&ParsedItem> {
        self.items.iter().find(|item| item.line == line)
    }

    /// Every marker token that appears in the document, duplicates included.
    pub fn markers(&self) -> HashSet<String> {
        self.items
            .iter()
            .flat_map(|item| item.marker.iter().chain(item.duplicate_marker.iter()))
            .cloned()
            .collect()
    }
}

/// Splits text into lines, dropping `\r` from CRLF endings.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

/// Parses a project document.
pub fn parse_document(text: &str) -> ParsedDocument {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let lines = split_lines(text);
    let mut doc = ParsedDocument::default();

    if let Some(span) = find_header_span(&lines, &mut doc.issues) {
        parse_header(
            &lines[span.open_line + 1..span.close_line],
            span.open_line + 1,
            &mut doc,
        );
        doc.body_start = span.close_line + 1;
        doc.header_span = Some(span);
    }

    parse_body(&lines, &mut doc);

    if let Some(title) = doc.header.title.clone() {
        doc.title = Some(title);
    }
    doc
}

fn find_header_span(lines: &[&str], issues: &mut Vec<ParseIssue>) -> Option<HeaderSpan> {
    let first = lines.first()?;
    if first.trim_end() != HEADER_DELIMITER {
        return None;
    }
    let close = lines
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, line)| {
            let trimmed = line.trim_end();
            trimmed == HEADER_DELIMITER || trimmed == "..."
        })
        .map(|(index, _)| index);
    match close {
        Some(close_line) => Some(HeaderSpan {
            open_line: 0,
            close_line,
        }),
        None => {
            issues.push(ParseIssue::at(
                0,
                "unterminated header block; treating file as body only",
            ));
            None
        }
    }
}

fn parse_header(lines: &[&str], offset: usize, doc: &mut ParsedDocument) {
    let mut index = 0;
    while index < lines.len() {
        let line_no = offset + index;
        let raw = lines[index];
        index += 1;

        if raw.trim().is_empty() || raw.trim_start().starts_with('#') {
            continue;
        }
        if raw.starts_with([' ', '\t']) || raw.trim_start().starts_with("- ") {
            doc.issues.push(ParseIssue::at(
                line_no,
                "indented header line without a parent key",
            ));
            continue;
        }
        let Some(caps) = HEADER_KEY_RE.captures(raw) else {
            doc.issues
                .push(ParseIssue::at(line_no, format!("malformed header line `{}`", raw.trim())));
            continue;
        };
        let key = caps["key"].to_string();
        let value = unquote(caps["value"].trim());

        let nested_start = index;
        while index < lines.len() && is_nested_line(lines[index]) {
            index += 1;
        }
        let nested = &lines[nested_start..index];

        apply_header_key(doc, &key, &value, nested, line_no);
    }
}

fn is_nested_line(line: &str) -> bool {
    !line.trim().is_empty() && (line.starts_with([' ', '\t']) || line.starts_with("- "))
}

fn apply_header_key(
    doc: &mut ParsedDocument,
    key: &str,
    value: &str,
    nested: &[&str],
    line_no: usize,
) {
    let header = &mut doc.header;
    match key.to_ascii_lowercase().as_str() {
        "external_id" => {
            if !value.is_empty() {
                header.external_id = Some(value.to_string());
            }
        }
        "title" => {
            if !value.is_empty() {
                header.title = Some(value.to_string());
            }
        }
        "status" => match ProjectStatus::parse(value) {
            Some(status) => header.status = Some(status),
            None if value.is_empty() => {}
            None => doc
                .issues
                .push(ParseIssue::at(line_no, format!("unknown project status `{value}`"))),
        },
        "priority" => match value.parse::<i64>() {
            Ok(priority) if (PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) => {
                header.priority = Some(priority);
            }
            Ok(priority) => {
                header.priority = Some(priority.clamp(PRIORITY_MIN, PRIORITY_MAX));
                doc.issues.push(ParseIssue::at(
                    line_no,
                    format!("priority {priority} out of range; clamped"),
                ));
            }
            Err(_) if value.is_empty() => {}
            Err(_) => doc
                .issues
                .push(ParseIssue::at(line_no, format!("invalid priority `{value}`"))),
        },
        "momentum_score" | "momentum" => match value.parse::<f64>() {
            Ok(score) if score.is_finite() => {
                if !(0.0..=1.0).contains(&score) {
                    doc.issues.push(ParseIssue::at(
                        line_no,
                        format!("momentum score {score} out of range; clamped"),
                    ));
                }
                header.momentum_score = Some(score.clamp(0.0, 1.0));
            }
            _ if value.is_empty() => {}
            _ => doc.issues.push(ParseIssue::at(
                line_no,
                format!("invalid momentum score `{value}`"),
            )),
        },
        "area" => {
            if !value.is_empty() {
                header.area = Some(value.to_string());
            }
        }
        "last_synced" => {
            if !value.is_empty() {
                header.last_synced = Some(value.to_string());
            }
        }
        "phases" => header.phases = parse_phases(value, nested),
        _ => header.extra.push((key.to_string(), value.to_string())),
    }
}

/// Accepts `[a, b]`, `- name` and `- name: X` / `status: Y` forms.
fn parse_phases(inline: &str, nested: &[&str]) -> Vec<Phase> {
    let mut phases = Vec::new();

    let inline = inline.trim();
    if let Some(list) = inline.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        phases.extend(
            list.split(',')
                .map(|name| unquote(name.trim()))
                .filter(|name| !name.is_empty())
                .map(|name| Phase { name, status: None }),
        );
    }

    for line in nested {
        let trimmed = line.trim();
        let (starts_entry, content) = match trimmed.strip_prefix("- ") {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };
        let pair = HEADER_KEY_RE
            .captures(content)
            .map(|caps| (caps["key"].to_ascii_lowercase(), unquote(caps["value"].trim())));

        match (starts_entry, pair) {
            (true, Some((key, value))) if key == "status" => phases.push(Phase {
                name: String::new(),
                status: Some(value),
            }),
            (true, Some((_, value))) => phases.push(Phase {
                name: value,
                status: None,
            }),
            (true, None) => phases.push(Phase {
                name: unquote(content),
                status: None,
            }),
            (false, Some((key, value))) => {
                if let Some(last) = phases.last_mut() {
                    match key.as_str() {
                        "status" => last.status = Some(value),
                        "name" => last.name = value,
                        _ => {}
                    }
                }
            }
            (false, None) => {}
        }
    }
    phases
}

fn unquote(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

fn parse_body(lines: &[&str], doc: &mut ParsedDocument) {
    let mut in_fence = false;
    let mut current_section: Option<usize> = None;
    let mut seen_markers: HashSet<String> = HashSet::new();

    for (line_no, raw) in lines.iter().enumerate().skip(doc.body_start) {
        let trimmed = raw.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        if let Some(caps) = HEADING_RE.captures(raw) {
            let level = caps["hashes"].len();
            let text = caps["text"].trim().to_string();
            if level == 1 {
                if doc.title_line.is_none() {
                    doc.title = Some(text.clone());
                    doc.title_line = Some(line_no);
                }
                current_section = None;
                continue;
            }
            doc.sections.push(Section {
                task_type: section_type(&text),
                heading: text,
                level,
                line: line_no,
            });
            current_section = Some(doc.sections.len() - 1);
            continue;
        }

        let Some(caps) = ITEM_RE.captures(raw) else {
            continue;
        };
        let state = CheckState::from_char(caps["state"].chars().next().unwrap_or(' '));
        let rest = &caps["rest"];
        let marker = find_marker(rest);
        let title = clean_title(rest);

        if title.is_empty() && marker.is_none() {
            doc.issues
                .push(ParseIssue::at(line_no, "checkbox item without a title; skipped"));
            continue;
        }

        let (token, duplicate, marker_type) = match marker {
            Some(found) if seen_markers.insert(found.token.clone()) => {
                (Some(found.token), None, found.kind)
            }
            Some(found) => {
                doc.issues.push(ParseIssue::at(
                    line_no,
                    format!("duplicate marker `{}`; treated as a new item", found.token),
                ));
                (None, Some(found.token), found.kind)
            }
            None => (None, None, None),
        };

        let section_hint = current_section.and_then(|index| doc.sections[index].task_type);
        let task_type = section_hint.or(marker_type).unwrap_or(TaskType::Action);

        doc.items.push(ParsedItem {
            line: line_no,
            indent: caps["indent"].to_string(),
            bullet: caps["bullet"].chars().next().unwrap_or('-'),
            state,
            title,
            marker: token,
            duplicate_marker: duplicate,
            marker_type,
            section: current_section,
            task_type,
        });
    }
}

/// Classifies a section heading into an item type.
pub fn section_type(heading: &str) -> Option<TaskType> {
    let lower = heading.to_ascii_lowercase();
    if lower.contains("waiting") {
        Some(TaskType::WaitingFor)
    } else if lower.contains("someday") || lower.contains("maybe") {
        Some(TaskType::Someday)
    } else if lower.contains("action") || lower.contains("task") || lower.contains("todo") {
        Some(TaskType::Action)
    } else {
        None
    }
}

fn clean_title(rest: &str) -> String {
    strip_markers(rest)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
