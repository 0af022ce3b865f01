use chrono::{Duration, Utc};
use momentum_core::config::EngineConfig;
use momentum_core::db::open_db_in_memory;
use momentum_core::model::sync_state::SyncStatus;
use momentum_core::model::task::TaskStatus;
use momentum_core::repo::{ProjectRepository, SqliteStore, TaskListQuery, TaskRepository};
use momentum_core::service::TaskService;
use momentum_core::sync::{PathLocks, PullOutcome, PushOutcome, Resolution, SyncEngine};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

const GROCERIES: &str = "# Groceries

Weekly shopping, keep it short.

## Next Actions
- [ ] Buy milk <!-- marker:aaa111 -->
- [ ] Buy bread <!-- marker:bbb222 -->

Remember the reusable bags.
";

fn engine() -> SyncEngine<SqliteStore> {
    let store = SqliteStore::new(open_db_in_memory().unwrap());
    SyncEngine::new(store, &EngineConfig::default(), PathLocks::new()).unwrap()
}

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn pull_applied(engine: &SyncEngine<SqliteStore>, path: &Path) -> momentum_core::sync::PullSummary {
    match engine.pull(path).unwrap() {
        PullOutcome::Applied(summary) => summary,
        other => panic!("expected applied pull, got {other:?}"),
    }
}

#[test]
fn marked_item_without_task_creates_pending_task() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "groceries.md", GROCERIES);
    let engine = engine();

    let summary = pull_applied(&engine, &path);
    assert!(summary.project_created);
    assert_eq!(summary.tasks_created, 2);

    let task = engine
        .store()
        .find_task_by_marker(summary.project_id, "aaa111")
        .unwrap()
        .expect("task should exist");
    assert_eq!(task.title, "Buy milk");
    assert_eq!(task.status, TaskStatus::Pending);

    let project = engine
        .store()
        .get_project(summary.project_id)
        .unwrap()
        .unwrap();
    assert_eq!(project.title, "Groceries");
    assert!(project.file_path.is_some());

    // Marked items need no stamping, so the file is untouched.
    assert_eq!(fs::read_to_string(&path).unwrap(), GROCERIES);
}

#[test]
fn store_completion_rewrites_only_that_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "groceries.md", GROCERIES);
    let engine = engine();
    let summary = pull_applied(&engine, &path);
    let task = engine
        .store()
        .find_task_by_marker(summary.project_id, "aaa111")
        .unwrap()
        .unwrap();

    TaskService::new(engine.store())
        .complete_task(task.id, Utc::now())
        .unwrap();
    let outcome = engine.push(summary.project_id).unwrap();
    assert_eq!(outcome, PushOutcome::Written { markers_assigned: 0 });

    let expected = GROCERIES.replace(
        "- [ ] Buy milk <!-- marker:aaa111 -->",
        "- [x] Buy milk <!-- marker:aaa111 -->",
    );
    assert_eq!(fs::read_to_string(&path).unwrap(), expected);

    assert_eq!(engine.pull(&path).unwrap(), PullOutcome::Unchanged);
    assert_eq!(
        engine.push(summary.project_id).unwrap(),
        PushOutcome::Unchanged
    );
}

#[test]
fn simultaneous_edits_outside_tolerance_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "groceries.md", GROCERIES);
    let engine = engine();
    let summary = pull_applied(&engine, &path);
    let task = engine
        .store()
        .find_task_by_marker(summary.project_id, "aaa111")
        .unwrap()
        .unwrap();

    // Store side completes the old title well after the file edit below.
    TaskService::new(engine.store())
        .complete_task(task.id, Utc::now() + Duration::hours(1))
        .unwrap();
    let renamed = GROCERIES.replace("Buy milk", "Buy oat milk");
    fs::write(&path, &renamed).unwrap();

    assert_eq!(engine.pull(&path).unwrap(), PullOutcome::Conflict);
    assert_eq!(engine.push(summary.project_id).unwrap(), PushOutcome::Conflict);
    assert_eq!(fs::read_to_string(&path).unwrap(), renamed);

    let state = engine.status(&path).unwrap().expect("state should exist");
    assert_eq!(state.status, SyncStatus::Conflict);
    assert_eq!(engine.list_conflicts().unwrap().len(), 1);
    assert_eq!(engine.summary().unwrap().conflict, 1);

    let stored = engine.store().get_task(task.id).unwrap().unwrap();
    assert_eq!(stored.title, "Buy milk");
    assert_eq!(stored.status, TaskStatus::Completed);

    match engine.resolve(state.id, true).unwrap() {
        Resolution::KeptFile(PullOutcome::Applied(_)) => {}
        other => panic!("expected file to be applied, got {other:?}"),
    }
    let resolved = engine.store().get_task(task.id).unwrap().unwrap();
    assert_eq!(resolved.title, "Buy oat milk");
    assert_eq!(resolved.status, TaskStatus::Pending);
    assert!(engine.list_conflicts().unwrap().is_empty());
}

#[test]
fn unmarked_items_get_stamped_and_keep_identity_across_renames() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        dir.path(),
        "house.md",
        "# House\n\n## Next Actions\n- [ ] Call plumber\n",
    );
    let engine = engine();

    let summary = pull_applied(&engine, &path);
    assert_eq!(summary.tasks_created, 1);
    assert_eq!(summary.markers_stamped, 1);

    let tasks = engine
        .store()
        .list_tasks(&TaskListQuery::for_project(summary.project_id))
        .unwrap();
    assert_eq!(tasks.len(), 1);
    let marker = tasks[0].marker.clone().expect("marker should be assigned");
    let stamped = fs::read_to_string(&path).unwrap();
    assert!(stamped.contains(&format!("- [ ] Call plumber <!-- marker:{marker} -->")));

    fs::write(&path, stamped.replace("Call plumber", "Call the plumber")).unwrap();
    pull_applied(&engine, &path);

    let after = engine
        .store()
        .list_tasks(&TaskListQuery::for_project(summary.project_id))
        .unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, tasks[0].id);
    assert_eq!(after[0].title, "Call the plumber");
    assert_eq!(after[0].marker.as_deref(), Some(marker.as_str()));
}

#[test]
fn removed_lines_tombstone_their_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "groceries.md", GROCERIES);
    let engine = engine();
    let summary = pull_applied(&engine, &path);

    fs::write(
        &path,
        GROCERIES.replace("- [ ] Buy bread <!-- marker:bbb222 -->\n", ""),
    )
    .unwrap();
    let second = pull_applied(&engine, &path);
    assert_eq!(second.tasks_deleted, 1);

    let bread = engine
        .store()
        .find_task_by_marker(summary.project_id, "bbb222")
        .unwrap()
        .expect("tombstone keeps the marker");
    assert!(bread.is_deleted);
}

#[test]
fn store_created_task_is_written_with_a_new_marker() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "groceries.md", GROCERIES);
    let engine = engine();
    let summary = pull_applied(&engine, &path);

    let created = TaskService::new(engine.store())
        .create_task(
            summary.project_id,
            "Buy eggs",
            momentum_core::model::task::TaskType::Action,
            Utc::now(),
        )
        .unwrap();
    assert_eq!(
        engine.push(summary.project_id).unwrap(),
        PushOutcome::Written { markers_assigned: 1 }
    );

    let stored = engine.store().get_task(created.id).unwrap().unwrap();
    let marker = stored.marker.expect("push should persist the marker");
    let content = fs::read_to_string(&path).unwrap();
    let eggs = format!("- [ ] Buy eggs <!-- marker:{marker} -->");
    let bread_at = content.find("Buy bread").unwrap();
    let eggs_at = content.find(&eggs).expect("new line should be written");
    assert!(eggs_at > bread_at);
    assert!(content.ends_with("Remember the reusable bags.\n"));

    assert_eq!(engine.pull(&path).unwrap(), PullOutcome::Unchanged);
}

#[test]
fn scan_continues_past_unreadable_files_and_honors_cancel() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.md", "# Alpha\n- [ ] first\n");
    fs::write(dir.path().join("b.md"), [0xff_u8, 0xfe, 0x00, 0x41]).unwrap();
    write_file(dir.path(), "c.md", "# Gamma\n- [ ] third\n");
    write_file(dir.path(), "notes.txt", "not tracked");
    fs::create_dir(dir.path().join(".trash")).unwrap();
    write_file(&dir.path().join(".trash"), "old.md", "# Old\n");
    let engine = engine();
    let roots = vec![dir.path().to_path_buf()];

    let report = engine.scan_all(&roots, &AtomicBool::new(false));
    assert_eq!(report.files_seen, 3);
    assert_eq!(report.created, 2);
    assert_eq!(report.errors, 1);
    assert!(report.failures[0].0.ends_with("b.md"));
    assert!(!report.cancelled);

    let state = engine
        .status(&dir.path().join("b.md"))
        .unwrap()
        .expect("failure should be recorded");
    assert_eq!(state.status, SyncStatus::Error);

    let again = engine.scan_all(&roots, &AtomicBool::new(false));
    assert_eq!(again.unchanged, 2);

    let cancelled = engine.scan_all(&roots, &AtomicBool::new(true));
    assert!(cancelled.cancelled);
    assert_eq!(cancelled.files_seen, 0);
}

#[test]
fn registered_folders_become_areas_for_their_files() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("10 Work");
    fs::create_dir(&work).unwrap();
    fs::create_dir(dir.path().join("scratch")).unwrap();
    let engine = engine();

    let area = engine
        .register_folder(&work)
        .unwrap()
        .expect("matching folder should register");
    assert_eq!(area.name, "Work");
    assert!(engine
        .register_folder(&dir.path().join("scratch"))
        .unwrap()
        .is_none());
    let again = engine.register_folder(&work).unwrap().unwrap();
    assert_eq!(again.id, area.id);

    let path = write_file(&work, "report.md", "# Quarterly report\n- [ ] outline\n");
    let summary = pull_applied(&engine, &path);
    let project = engine
        .store()
        .get_project(summary.project_id)
        .unwrap()
        .unwrap();
    assert_eq!(project.area_id, Some(area.id));
}

#[test]
fn push_without_linked_file_is_rejected() {
    let engine = engine();
    let project = momentum_core::model::project::Project::new("Loose", Utc::now());
    engine.store().create_project(&project).unwrap();
    assert!(matches!(
        engine.push(project.id),
        Err(momentum_core::sync::SyncError::NotLinked(id)) if id == project.id
    ));
}

const LAUNCH: &str = "---
external_id: 42
status: active
priority: 2
momentum_score: 0.75
area: Work
---
# Launch Website

## Next Actions
- [ ] Pick hosting <!-- marker:aaa111 -->
- [x] Register domain <!-- marker:def456 -->

## Waiting For
- [ ] Design mockups from Sam <!-- marker:ghi789:waiting -->
";

#[test]
fn completion_on_full_header_document_rewrites_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "launch.md", LAUNCH);
    let engine = engine();

    let summary = pull_applied(&engine, &path);
    assert_eq!(summary.tasks_created, 3);
    let project = engine
        .store()
        .get_project(summary.project_id)
        .unwrap()
        .unwrap();
    assert_eq!(project.external_id.as_deref(), Some("42"));
    assert_eq!(project.momentum_score, 0.75);
    assert_eq!(project.priority, Some(2));
    assert_eq!(fs::read_to_string(&path).unwrap(), LAUNCH);

    let hosting = engine
        .store()
        .find_task_by_marker(summary.project_id, "aaa111")
        .unwrap()
        .unwrap();
    TaskService::new(engine.store())
        .complete_task(hosting.id, Utc::now())
        .unwrap();
    assert_eq!(
        engine.push(summary.project_id).unwrap(),
        PushOutcome::Written { markers_assigned: 0 }
    );

    let expected = LAUNCH.replace(
        "- [ ] Pick hosting <!-- marker:aaa111 -->",
        "- [x] Pick hosting <!-- marker:aaa111 -->",
    );
    assert_eq!(fs::read_to_string(&path).unwrap(), expected);
    assert_eq!(engine.pull(&path).unwrap(), PullOutcome::Unchanged);
}

#[test]
fn non_uuid_external_id_relinks_a_moved_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "launch.md", LAUNCH);
    let engine = engine();
    let first = pull_applied(&engine, &path);

    let moved = dir.path().join("website.md");
    fs::rename(&path, &moved).unwrap();
    let second = pull_applied(&engine, &moved);

    assert_eq!(second.project_id, first.project_id);
    assert!(!second.project_created);
    assert_eq!(second.tasks_created, 0);
    let by_id = engine
        .store()
        .find_project_by_external_id("42")
        .unwrap()
        .expect("project keeps its header id");
    assert_eq!(by_id.id, first.project_id);
}

#[test]
fn file_edit_within_tolerance_of_store_edit_is_pulled() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "groceries.md", GROCERIES);
    let engine = engine();
    let summary = pull_applied(&engine, &path);
    let milk = engine
        .store()
        .find_task_by_marker(summary.project_id, "aaa111")
        .unwrap()
        .unwrap();

    TaskService::new(engine.store())
        .complete_task(milk.id, Utc::now())
        .unwrap();
    let renamed = GROCERIES.replace("Buy milk", "Buy oat milk");
    fs::write(&path, &renamed).unwrap();

    let applied = pull_applied(&engine, &path);
    assert_eq!(applied.tasks_updated, 1);

    let stored = engine.store().get_task(milk.id).unwrap().unwrap();
    assert_eq!(stored.title, "Buy oat milk");
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(fs::read_to_string(&path).unwrap(), renamed);
    assert!(engine.list_conflicts().unwrap().is_empty());
    let state = engine.status(&path).unwrap().unwrap();
    assert_eq!(state.status, SyncStatus::Synced);
}

#[test]
fn push_within_tolerance_pulls_the_edited_file_instead() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "groceries.md", GROCERIES);
    let engine = engine();
    let summary = pull_applied(&engine, &path);
    let milk = engine
        .store()
        .find_task_by_marker(summary.project_id, "aaa111")
        .unwrap()
        .unwrap();

    TaskService::new(engine.store())
        .complete_task(milk.id, Utc::now())
        .unwrap();
    let renamed = GROCERIES.replace("Buy milk", "Buy oat milk");
    fs::write(&path, &renamed).unwrap();

    match engine.push(summary.project_id).unwrap() {
        PushOutcome::Pulled(pulled) => assert_eq!(pulled.tasks_updated, 1),
        other => panic!("expected the file to be pulled, got {other:?}"),
    }
    assert_eq!(fs::read_to_string(&path).unwrap(), renamed);
    let stored = engine.store().get_task(milk.id).unwrap().unwrap();
    assert_eq!(stored.title, "Buy oat milk");
    assert_eq!(stored.status, TaskStatus::Pending);

    assert_eq!(
        engine.push(summary.project_id).unwrap(),
        PushOutcome::Unchanged
    );
}

#[test]
fn push_over_untouched_store_pulls_file_edit() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "groceries.md", GROCERIES);
    let engine = engine();
    let summary = pull_applied(&engine, &path);

    let edited = GROCERIES.replace("- [ ] Buy bread", "- [x] Buy bread");
    fs::write(&path, &edited).unwrap();

    assert!(matches!(
        engine.push(summary.project_id).unwrap(),
        PushOutcome::Pulled(_)
    ));
    let bread = engine
        .store()
        .find_task_by_marker(summary.project_id, "bbb222")
        .unwrap()
        .unwrap();
    assert_eq!(bread.status, TaskStatus::Completed);
    assert_eq!(fs::read_to_string(&path).unwrap(), edited);
}
