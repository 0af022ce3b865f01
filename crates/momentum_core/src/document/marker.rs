//! Hidden per-task identity markers (`<!-- marker:abc123[:type] -->`).

use crate::model::task::TaskType;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use uuid::Uuid;

pub const MARKER_LEN: usize = 6;

pub(crate) static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<!--\s*marker:(?P<token>[A-Za-z0-9_-]+)(?::(?P<kind>[A-Za-z_]+))?\s*-->")
        .expect("valid marker regex")
});

/// Marker comment found on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRef {
    pub token: String,
    pub kind: Option<TaskType>,
    /// Exact comment text, preserved verbatim on rewrite.
    pub raw: String,
}

/// Finds the first marker comment in `line`.
pub fn find_marker(line: &str) -> Option<MarkerRef> {
    let caps = MARKER_RE.captures(line)?;
    let token = caps.name("token")?.as_str().to_string();
    let kind = caps
        .name("kind")
        .and_then(|kind| TaskType::parse(&kind.as_str().to_ascii_lowercase()));
    let raw = caps.get(0)?.as_str().to_string();
    Some(MarkerRef { token, kind, raw })
}

/// Removes every marker comment from `text`.
pub fn strip_markers(text: &str) -> String {
    MARKER_RE.replace_all(text, "").to_string()
}

/// Formats the comment for a marker token.
pub fn marker_comment(token: &str, kind: TaskType) -> String {
    match kind.marker_suffix() {
        Some(suffix) => format!("<!-- marker:{token}:{suffix} -->"),
        None => format!("<!-- marker:{token} -->"),
    }
}

/// Generates a short marker not present in `taken`.
pub fn generate_marker(taken: &HashSet<String>) -> String {
    loop {
        let candidate: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(MARKER_LEN)
            .collect();
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{find_marker, generate_marker, marker_comment, strip_markers, MARKER_LEN};
    use crate::model::task::TaskType;
    use std::collections::HashSet;

    #[test]
    fn finds_marker_with_type_suffix() {
        let marker = find_marker("- [ ] Blocked item <!-- marker:ghi789:waiting -->")
            .expect("marker should be found");
        assert_eq!(marker.token, "ghi789");
        assert_eq!(marker.kind, Some(TaskType::WaitingFor));
        assert_eq!(marker.raw, "<!-- marker:ghi789:waiting -->");
    }

    #[test]
    fn strip_removes_comment_only() {
        assert_eq!(
            strip_markers("Buy milk <!-- marker:aaa111 -->").trim(),
            "Buy milk"
        );
    }

    #[test]
    fn generated_markers_avoid_taken_tokens() {
        let mut taken = HashSet::new();
        for _ in 0..200 {
            let marker = generate_marker(&taken);
            assert_eq!(marker.len(), MARKER_LEN);
            assert!(taken.insert(marker));
        }
    }

    #[test]
    fn comment_carries_suffix_for_non_actions() {
        assert_eq!(marker_comment("abc123", TaskType::Action), "<!-- marker:abc123 -->");
        assert_eq!(
            marker_comment("abc123", TaskType::Someday),
            "<!-- marker:abc123:someday -->"
        );
    }
}
