//! File access helpers for tracked documents.

use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Content and modification time of a tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub content: String,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Reads a file and its mtime.
pub fn read_snapshot(path: &Path) -> std::io::Result<FileSnapshot> {
    let content = std::fs::read_to_string(path)?;
    let modified_at = std::fs::metadata(path)?
        .modified()
        .ok()
        .map(DateTime::<Utc>::from);
    Ok(FileSnapshot {
        content,
        modified_at,
    })
}

/// Replaces `path` with `content` through a temp file in the same folder.
///
/// The temp file is fsynced and then persisted over `path`, so readers see
/// either the old or the new content. Its `.tmp` name is hidden from the
/// watcher, and it is removed when the write fails.
pub fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{atomic_write, read_snapshot};

    #[test]
    fn atomic_write_replaces_content_without_leftovers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("launch.md");
        std::fs::write(&path, "old\n").expect("seed file");

        atomic_write(&path, "new\n").expect("atomic write");

        let snapshot = read_snapshot(&path).expect("read back");
        assert_eq!(snapshot.content, "new\n");
        assert!(snapshot.modified_at.is_some());
        let entries = std::fs::read_dir(dir.path()).expect("list dir").count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn atomic_write_creates_missing_parent_folders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("10 Work").join("report.md");

        atomic_write(&path, "# Report\n").expect("atomic write");

        assert_eq!(
            std::fs::read_to_string(&path).expect("read back"),
            "# Report\n"
        );
    }
}
