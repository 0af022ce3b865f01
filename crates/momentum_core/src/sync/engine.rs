//! Sync engine: pull, push, conflict handling and batch scans.
//!
//! # Responsibility
//! - Pull: file → fingerprint → parse → store, unless unchanged or conflicting.
//! - Push: store → writer → atomic write, unless the file changed underneath.
//! - Scan configured roots and register area folders.
//!
//! # Invariants
//! - A conflict needs a divergent fingerprint, a store change since the
//!   last sync, and `|file_mtime - store_updated| > tolerance`.
//! - Inside the tolerance the file wins wholesale, whichever side's clock
//!   reads later; mtimes that close together are not ordered reliably.
//! - IO failures mark the sync state `error` and are reported as outcomes.

use crate::config::{EngineConfig, SyncConfig};
use crate::document::parser::parse_document;
use crate::document::writer::render_document;
use crate::model::activity::{Activity, ActivityAction, ActivitySource, EntityType};
use crate::model::area::Area;
use crate::model::project::{Project, ProjectId};
use crate::model::sync_state::{SyncState, SyncStateId, SyncStatus};
use crate::repo::{RepoError, Store, TaskListQuery};
use crate::sync::apply::{apply_document, ApplyInput, PullSummary};
use crate::sync::fingerprint::fingerprint;
use crate::sync::fs::{atomic_write, read_snapshot, FileSnapshot};
use crate::sync::lock::{PathGuard, PathLocks};
use crate::sync::{SyncError, SyncResult};
use crate::watch::watcher::has_extension;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;
use walkdir::WalkDir;

/// Result of a pull.
#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    /// Fingerprint matched the last sync.
    Unchanged,
    Applied(PullSummary),
    Conflict,
    /// The file could not be read; the sync state records the error.
    Failed(String),
}

/// Result of a push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Rendered text equals the file content.
    Unchanged,
    Written { markers_assigned: usize },
    /// The file diverged from the last sync within tolerance and was pulled
    /// instead.
    Pulled(PullSummary),
    Conflict,
    Failed(String),
}

/// Which side a conflict resolution kept.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    KeptFile(PullOutcome),
    KeptStore(PushOutcome),
}

/// Aggregated counts of one [`SyncEngine::scan_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files_seen: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    pub errors: usize,
    pub cancelled: bool,
    pub failures: Vec<(PathBuf, String)>,
}

/// Sync-state counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub synced: usize,
    pub pending: usize,
    pub conflict: usize,
    pub error: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    TakeFile,
    Conflict,
}

/// Decides a divergent file against the store. Only a gap wider than
/// `tolerance` is a conflict; anything closer goes to the file.
fn decide(
    store_updated: DateTime<Utc>,
    last_synced_at: Option<DateTime<Utc>>,
    file_mtime: Option<DateTime<Utc>>,
    tolerance: ChronoDuration,
) -> Decision {
    let store_changed = last_synced_at.map_or(true, |synced| store_updated > synced);
    if !store_changed {
        return Decision::TakeFile;
    }
    let Some(mtime) = file_mtime else {
        return Decision::Conflict;
    };
    let delta = if mtime > store_updated {
        mtime - store_updated
    } else {
        store_updated - mtime
    };
    if delta > tolerance {
        Decision::Conflict
    } else {
        Decision::TakeFile
    }
}

pub struct SyncEngine<S: Store> {
    store: S,
    config: SyncConfig,
    folder_pattern: Regex,
    locks: PathLocks,
}

impl<S: Store> SyncEngine<S> {
    /// # Errors
    /// Returns [`SyncError::Config`] when the folder pattern does not compile.
    pub fn new(store: S, config: &EngineConfig, locks: PathLocks) -> SyncResult<Self> {
        let folder_pattern = Regex::new(&config.watch.folder_pattern)
            .map_err(|err| SyncError::Config(err.to_string()))?;
        Ok(Self {
            store,
            config: config.sync.clone(),
            folder_pattern,
            locks,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    /// Applies file changes at `path` to the store.
    pub fn pull(&self, path: &Path) -> SyncResult<PullOutcome> {
        let key = path_key(path);
        let _guard = self.lock(&key)?;
        self.pull_locked(&key, false, Utc::now())
    }

    /// Writes the project's store state to its linked file.
    pub fn push(&self, project_id: ProjectId) -> SyncResult<PushOutcome> {
        self.push_with(project_id, false)
    }

    /// Clears a conflict by keeping the file (`true`) or the store (`false`).
    pub fn resolve(&self, sync_id: SyncStateId, keep_file: bool) -> SyncResult<Resolution> {
        let state = self
            .store
            .get_sync_state(sync_id)?
            .ok_or(RepoError::NotFound(sync_id))?;
        info!(
            "event=sync_resolve module=sync status=start path={} keep_file={}",
            state.file_path, keep_file
        );

        if keep_file {
            let _guard = self.lock(&state.file_path)?;
            let outcome = self.pull_locked(&state.file_path, true, Utc::now())?;
            return Ok(Resolution::KeptFile(outcome));
        }

        let project_id = match state.project_id {
            Some(id) => id,
            None => self
                .store
                .find_project_by_path(&state.file_path)?
                .map(|project| project.id)
                .ok_or(RepoError::NotFound(state.id))?,
        };
        Ok(Resolution::KeptStore(self.push_with(project_id, true)?))
    }

    /// Pulls every tracked file under `roots`, in sorted order.
    ///
    /// `cancel` is checked between files; a file in progress completes.
    pub fn scan_all(&self, roots: &[PathBuf], cancel: &AtomicBool) -> ScanReport {
        let mut report = ScanReport::default();
        let files = self.collect_files(roots, &mut report);

        for path in files {
            if cancel.load(Ordering::SeqCst) {
                report.cancelled = true;
                info!(
                    "event=sync_scan module=sync status=cancelled seen={}",
                    report.files_seen
                );
                break;
            }
            report.files_seen += 1;
            match self.pull(&path) {
                Ok(PullOutcome::Unchanged) => report.unchanged += 1,
                Ok(PullOutcome::Applied(summary)) if summary.project_created => report.created += 1,
                Ok(PullOutcome::Applied(_)) => report.updated += 1,
                Ok(PullOutcome::Conflict) => report.conflicts += 1,
                Ok(PullOutcome::Failed(message)) => {
                    report.errors += 1;
                    report.failures.push((path, message));
                }
                Err(err) => {
                    error!(
                        "event=sync_scan_file module=sync status=error path={} error={}",
                        path.display(),
                        err
                    );
                    report.errors += 1;
                    report.failures.push((path, err.to_string()));
                }
            }
        }

        info!(
            "event=sync_scan module=sync status=ok seen={} created={} updated={} unchanged={} conflicts={} errors={}",
            report.files_seen,
            report.created,
            report.updated,
            report.unchanged,
            report.conflicts,
            report.errors
        );
        report
    }

    /// Registers an area for a folder whose name matches the folder pattern.
    ///
    /// Returns `None` for non-matching folders; an existing area is reused.
    pub fn register_folder(&self, path: &Path) -> SyncResult<Option<Area>> {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return Ok(None);
        };
        let Some(caps) = self.folder_pattern.captures(name) else {
            return Ok(None);
        };
        let area_name = caps
            .name("name")
            .map(|m| m.as_str().trim())
            .filter(|value| !value.is_empty())
            .unwrap_or(name)
            .to_string();

        if let Some(area) = self.store.find_area_by_name(&area_name)? {
            return Ok(Some(area));
        }

        let now = Utc::now();
        let mut area = Area::new(area_name, now);
        area.folder_path = Some(path_key(path));
        let created = self.store.in_transaction(|store| {
            store.create_area(&area)?;
            let activity = Activity::new(
                EntityType::Area,
                area.id,
                None,
                ActivityAction::Created,
                ActivitySource::System,
                now,
            )
            .with_detail(area.name.clone());
            store.append_activity(&activity)?;
            Ok::<(), SyncError>(())
        });

        match created {
            Ok(()) => {
                info!(
                    "event=area_register module=sync status=ok area={} folder={}",
                    area.name,
                    path.display()
                );
                Ok(Some(area))
            }
            Err(SyncError::Repo(RepoError::Duplicate(_))) => {
                Ok(self.store.find_area_by_name(&area.name)?)
            }
            Err(err) => Err(err),
        }
    }

    pub fn status(&self, path: &Path) -> SyncResult<Option<SyncState>> {
        Ok(self.store.find_sync_state_by_path(&path_key(path))?)
    }

    pub fn list_conflicts(&self) -> SyncResult<Vec<SyncState>> {
        Ok(self.store.list_sync_states(Some(SyncStatus::Conflict))?)
    }

    pub fn summary(&self) -> SyncResult<SyncSummary> {
        let mut summary = SyncSummary::default();
        for state in self.store.list_sync_states(None)? {
            match state.status {
                SyncStatus::Synced => summary.synced += 1,
                SyncStatus::Pending => summary.pending += 1,
                SyncStatus::Conflict => summary.conflict += 1,
                SyncStatus::Error => summary.error += 1,
            }
        }
        Ok(summary)
    }

    fn push_with(&self, project_id: ProjectId, forced: bool) -> SyncResult<PushOutcome> {
        let project = self
            .store
            .get_project(project_id)?
            .ok_or(RepoError::NotFound(project_id))?;
        let key = project
            .file_path
            .clone()
            .ok_or(SyncError::NotLinked(project_id))?;
        let _guard = self.lock(&key)?;
        let now = Utc::now();

        let state = self
            .store
            .find_sync_state_by_path(&key)?
            .unwrap_or_else(|| SyncState::new(key.clone()));
        let snapshot = match read_snapshot(Path::new(&key)) {
            Ok(snapshot) => Some(snapshot),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                let message = self.record_failure(state, format!("read failed: {err}"))?;
                return Ok(PushOutcome::Failed(message));
            }
        };

        if let Some(current) = snapshot.as_ref().filter(|_| !forced) {
            let current_fp = fingerprint(&current.content);
            if state.last_fingerprint.as_deref() != Some(current_fp.as_str()) {
                let store_updated = self.store_updated(&project)?;
                match decide(
                    store_updated,
                    state.last_synced_at,
                    current.modified_at,
                    self.tolerance(),
                ) {
                    Decision::TakeFile => {
                        debug!(
                            "event=sync_push module=sync status=pull_instead path={}",
                            key
                        );
                        return Ok(match self.pull_locked(&key, true, now)? {
                            PullOutcome::Applied(summary) => PushOutcome::Pulled(summary),
                            PullOutcome::Failed(message) => PushOutcome::Failed(message),
                            _ => PushOutcome::Unchanged,
                        });
                    }
                    Decision::Conflict => {
                        self.record_conflict(state, current.modified_at)?;
                        return Ok(PushOutcome::Conflict);
                    }
                }
            }
        }

        self.write_locked(&project, state, snapshot.as_ref(), now)
    }

    fn pull_locked(&self, key: &str, forced: bool, now: DateTime<Utc>) -> SyncResult<PullOutcome> {
        let mut state = self
            .store
            .find_sync_state_by_path(key)?
            .unwrap_or_else(|| SyncState::new(key));

        let snapshot = match read_snapshot(Path::new(key)) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let message = self.record_failure(state, format!("read failed: {err}"))?;
                return Ok(PullOutcome::Failed(message));
            }
        };
        let current_fp = fingerprint(&snapshot.content);

        if !forced && state.last_fingerprint.as_deref() == Some(current_fp.as_str()) {
            if state.status == SyncStatus::Error {
                state.status = SyncStatus::Synced;
                state.last_error = None;
                self.store.upsert_sync_state(&state)?;
            }
            debug!("event=sync_pull module=sync status=unchanged path={}", key);
            return Ok(PullOutcome::Unchanged);
        }

        let doc = parse_document(&snapshot.content);
        let project = self.locate_project(key, doc.header.external_id.as_deref(), &state)?;

        if !forced && state.last_fingerprint.is_some() {
            if let Some(project) = &project {
                let store_updated = self.store_updated(project)?;
                match decide(
                    store_updated,
                    state.last_synced_at,
                    snapshot.modified_at,
                    self.tolerance(),
                ) {
                    Decision::TakeFile => {}
                    Decision::Conflict => {
                        self.record_conflict(state, snapshot.modified_at)?;
                        return Ok(PullOutcome::Conflict);
                    }
                }
            }
        }

        let applied = self.store.in_transaction(|store| {
            apply_document(
                store,
                ApplyInput {
                    key,
                    doc: &doc,
                    fingerprint: &current_fp,
                    project,
                    now,
                },
            )
        });
        let applied = match applied {
            Ok(applied) => applied,
            Err(err) => {
                error!(
                    "event=sync_pull module=sync status=error path={} error={}",
                    key, err
                );
                self.record_failure(state, err.to_string())?;
                return Err(err);
            }
        };

        let mut summary = applied.summary;
        state.project_id = Some(summary.project_id);
        state.mark_synced(current_fp, snapshot.modified_at, now);
        self.store.upsert_sync_state(&state)?;

        if applied.needs_stamp && self.config.stamp_new_markers {
            let project = self
                .store
                .get_project(summary.project_id)?
                .ok_or(RepoError::NotFound(summary.project_id))?;
            if let PushOutcome::Written { .. } =
                self.write_locked(&project, state, Some(&snapshot), now)?
            {
                summary.markers_stamped = doc.items.iter().filter(|item| item.marker.is_none()).count();
            }
        }

        info!(
            "event=sync_pull module=sync status=ok path={} project={} created={} updated={} deleted={} stamped={} issues={}",
            key,
            summary.project_id,
            summary.tasks_created,
            summary.tasks_updated,
            summary.tasks_deleted,
            summary.markers_stamped,
            summary.issues.len()
        );
        Ok(PullOutcome::Applied(summary))
    }

    /// Renders the project onto the current file text and persists the
    /// resulting markers, line hints and fingerprint.
    fn write_locked(
        &self,
        project: &Project,
        mut state: SyncState,
        snapshot: Option<&FileSnapshot>,
        now: DateTime<Utc>,
    ) -> SyncResult<PushOutcome> {
        let key = state.file_path.clone();
        let tasks = self.store.list_tasks(&TaskListQuery {
            include_deleted: true,
            ..TaskListQuery::for_project(project.id)
        })?;
        let area_name = match project.area_id {
            Some(area_id) => self.store.get_area(area_id)?.map(|area| area.name),
            None => None,
        };

        let existing = snapshot.map(|snapshot| snapshot.content.as_str());
        let rendered = render_document(project, area_name.as_deref(), &tasks, existing, now);
        let written_fp = fingerprint(&rendered.content);

        if existing == Some(rendered.content.as_str()) {
            state.project_id = Some(project.id);
            state.mark_synced(written_fp, snapshot.and_then(|s| s.modified_at), now);
            self.store.upsert_sync_state(&state)?;
            debug!("event=sync_push module=sync status=unchanged path={}", key);
            return Ok(PushOutcome::Unchanged);
        }

        if let Err(err) = atomic_write(Path::new(&key), &rendered.content) {
            let message = self.record_failure(state, format!("write failed: {err}"))?;
            return Ok(PushOutcome::Failed(message));
        }
        let mtime = std::fs::metadata(&key)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        self.store.in_transaction(|store| {
            for task in &tasks {
                let assigned = rendered.marker_for(task.id);
                let line = rendered
                    .line_of(task.id)
                    .and_then(|line| u32::try_from(line).ok());
                let needs_marker = assigned.is_some() && task.marker.is_none();
                let needs_hint = !task.is_deleted && line.is_some() && line != task.line_hint;
                if !needs_marker && !needs_hint {
                    continue;
                }
                let mut placed = task.clone();
                if let Some(marker) = assigned {
                    placed.marker = Some(marker.to_string());
                }
                if needs_hint {
                    placed.line_hint = line;
                }
                store.update_task(&placed)?;
            }
            let mut linked = project.clone();
            linked.content_fingerprint = Some(written_fp.clone());
            store.update_project(&linked)?;

            state.project_id = Some(project.id);
            state.mark_synced(written_fp.clone(), mtime, now);
            store.upsert_sync_state(&state)?;
            Ok::<(), SyncError>(())
        })?;

        info!(
            "event=sync_push module=sync status=ok path={} project={} markers_assigned={}",
            key,
            project.id,
            rendered.assigned_markers.len()
        );
        Ok(PushOutcome::Written {
            markers_assigned: rendered.assigned_markers.len(),
        })
    }

    fn locate_project(
        &self,
        key: &str,
        external_id: Option<&str>,
        state: &SyncState,
    ) -> SyncResult<Option<Project>> {
        if let Some(raw) = external_id.map(str::trim).filter(|raw| !raw.is_empty()) {
            let by_header = match self.store.find_project_by_external_id(raw)? {
                Some(project) => Some(project),
                None => match Uuid::parse_str(raw) {
                    Ok(id) => self.store.get_project(id)?,
                    Err(_) => None,
                },
            };
            if let Some(project) = by_header {
                let linked_elsewhere = project
                    .file_path
                    .as_deref()
                    .map_or(false, |linked| linked != key && Path::new(linked).exists());
                if !linked_elsewhere {
                    return Ok(Some(project));
                }
                warn!(
                    "event=sync_pull module=sync status=duplicate_external_id path={} project={}",
                    key, project.id
                );
            }
        }

        if let Some(project) = self.store.find_project_by_path(key)? {
            return Ok(Some(project));
        }
        match state.project_id {
            Some(id) => Ok(self.store.get_project(id)?),
            None => Ok(None),
        }
    }

    /// Latest store-side change of the project or any of its tasks.
    fn store_updated(&self, project: &Project) -> SyncResult<DateTime<Utc>> {
        let tasks = self.store.list_tasks(&TaskListQuery {
            include_deleted: true,
            ..TaskListQuery::for_project(project.id)
        })?;
        Ok(tasks
            .iter()
            .map(|task| task.updated_at)
            .fold(project.updated_at, |latest, updated| latest.max(updated)))
    }

    fn record_failure(&self, mut state: SyncState, message: String) -> SyncResult<String> {
        warn!(
            "event=sync_file module=sync status=error path={} error={}",
            state.file_path, message
        );
        state.mark_error(message.clone());
        self.store.upsert_sync_state(&state)?;
        Ok(message)
    }

    fn record_conflict(&self, mut state: SyncState, mtime: Option<DateTime<Utc>>) -> SyncResult<()> {
        warn!(
            "event=sync_conflict module=sync status=conflict path={}",
            state.file_path
        );
        state.mark_conflict(mtime);
        self.store.upsert_sync_state(&state)?;
        Ok(())
    }

    fn lock(&self, key: &str) -> SyncResult<PathGuard> {
        self.locks
            .acquire(
                Path::new(key),
                Duration::from_millis(self.config.lock_timeout_ms),
            )
            .ok_or_else(|| SyncError::Busy(PathBuf::from(key)))
    }

    fn tolerance(&self) -> ChronoDuration {
        self.config.conflict_tolerance()
    }

    fn collect_files(&self, roots: &[PathBuf], report: &mut ScanReport) -> Vec<PathBuf> {
        let extension = self.config.extension();
        let mut files = Vec::new();
        for root in roots {
            if !root.exists() {
                report.errors += 1;
                report
                    .failures
                    .push((root.clone(), "root does not exist".to_string()));
                continue;
            }
            let walker = WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));
            for entry in walker {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        if has_extension(entry.path(), extension) {
                            files.push(entry.into_path());
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                        warn!(
                            "event=sync_scan_walk module=sync status=error path={} error={}",
                            path.display(),
                            err
                        );
                        report.errors += 1;
                        report.failures.push((path, err.to_string()));
                    }
                }
            }
        }
        files.sort();
        files.dedup();
        files
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map_or(false, |name| name.starts_with('.'))
}

/// Canonical string key of a tracked path; the parent is canonicalized
/// when the file itself is gone.
pub fn path_key(path: &Path) -> String {
    let resolved = std::fs::canonicalize(path).ok().or_else(|| {
        let parent = path.parent()?;
        let name = path.file_name()?;
        std::fs::canonicalize(parent).ok().map(|parent| parent.join(name))
    });
    resolved
        .unwrap_or_else(|| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::{decide, Decision};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn untouched_store_always_takes_file() {
        let synced = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let decision = decide(synced, Some(synced), Some(synced + Duration::days(3)), Duration::seconds(2));
        assert_eq!(decision, Decision::TakeFile);
    }

    #[test]
    fn both_sides_changed_far_apart_is_a_conflict() {
        let synced = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let store = synced + Duration::minutes(5);
        let file = store + Duration::minutes(1);
        assert_eq!(
            decide(store, Some(synced), Some(file), Duration::seconds(2)),
            Decision::Conflict
        );
        assert_eq!(
            decide(store, Some(synced), None, Duration::seconds(2)),
            Decision::Conflict
        );
    }

    #[test]
    fn within_tolerance_the_file_wins_either_way() {
        let synced = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let store = synced + Duration::minutes(5);
        for skew in [
            Duration::seconds(1),
            Duration::milliseconds(1),
            Duration::zero(),
            Duration::milliseconds(-1),
            Duration::seconds(-1),
            Duration::seconds(-2),
        ] {
            assert_eq!(
                decide(store, Some(synced), Some(store + skew), Duration::seconds(2)),
                Decision::TakeFile,
                "skew {skew}"
            );
        }
    }
}
