use chrono::{DateTime, Duration, TimeZone, Utc};
use momentum_core::config::EngineConfig;
use momentum_core::db::open_db_in_memory;
use momentum_core::model::activity::{Activity, ActivityAction, ActivitySource, EntityType};
use momentum_core::model::project::{MomentumTrend, Project, ProjectStatus};
use momentum_core::model::task::{Task, TaskStatus};
use momentum_core::momentum::{MomentumEngine, RankFilters, RankTier};
use momentum_core::repo::{
    ActivityQuery, ActivityRepository, ProjectRepository, SqliteStore, TaskListQuery,
    TaskRepository,
};
use momentum_core::sync::{PathLocks, PullOutcome, PushOutcome, SyncEngine};
use std::fs;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).single().unwrap()
}

fn store() -> SqliteStore {
    SqliteStore::new(open_db_in_memory().unwrap())
}

fn project_idle_for(store: &SqliteStore, title: &str, days: i64) -> Project {
    let mut project = Project::new(title, now() - Duration::days(40));
    project.last_activity_at = Some(now() - Duration::days(days));
    store.create_project(&project).unwrap();
    project
}

#[test]
fn long_inactivity_stalls_project_and_creates_one_unstuck_task() {
    let store = store();
    let engine = MomentumEngine::new(&EngineConfig::default());
    let project = project_idle_for(&store, "Novel", 20);
    let chapter = Task::new(project.id, "Outline chapter 3", now() - Duration::days(30));
    store.create_task(&chapter).unwrap();

    let report = engine.recompute_all(&store, now()).unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].from, ProjectStatus::Active);
    assert_eq!(report.transitions[0].to, ProjectStatus::Stalled);
    assert_eq!(report.unstuck_created.len(), 1);
    assert!(report.changed_projects.is_empty());

    let stalled = store.get_project(project.id).unwrap().unwrap();
    assert_eq!(stalled.status, ProjectStatus::Stalled);
    assert_eq!(stalled.stalled_since, Some(now()));
    assert!(stalled.momentum_score < 0.2);

    let unstuck = store
        .get_task(report.unstuck_created[0])
        .unwrap()
        .unwrap();
    assert_eq!(unstuck.title, "Spend 5 minutes on: Outline chapter 3");
    assert!(unstuck.is_unstuck && unstuck.is_quick_win && unstuck.is_next_action);
    assert_eq!(unstuck.estimated_minutes, Some(5));

    let activities = store
        .list_activities(&ActivityQuery {
            project_id: Some(project.id),
            since: None,
        })
        .unwrap();
    assert!(activities.iter().any(|activity| {
        activity.action == ActivityAction::StatusChanged
            && activity.source == ActivitySource::System
    }));

    let later = engine
        .recompute_all(&store, now() + Duration::days(1))
        .unwrap();
    assert!(later.transitions.is_empty());
    assert!(later.unstuck_created.is_empty());
    let tasks = store
        .list_tasks(&TaskListQuery::for_project(project.id))
        .unwrap();
    assert_eq!(tasks.iter().filter(|task| task.is_unstuck).count(), 1);
    let still = store.get_project(project.id).unwrap().unwrap();
    assert_eq!(still.stalled_since, Some(now()));
}

#[test]
fn existing_unstuck_task_prevents_a_second_one() {
    let store = store();
    let engine = MomentumEngine::new(&EngineConfig::default());
    let project = project_idle_for(&store, "Garage", 30);
    let mut unstuck = Task::new(project.id, "Spend 5 minutes on: sweep", now() - Duration::days(20));
    unstuck.is_unstuck = true;
    store.create_task(&unstuck).unwrap();

    let report = engine.recompute_all(&store, now()).unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert!(report.unstuck_created.is_empty());
}

#[test]
fn resumed_activity_brings_project_back_to_active() {
    let store = store();
    let engine = MomentumEngine::new(&EngineConfig::default());
    let project = project_idle_for(&store, "Garden", 20);
    engine.recompute_all(&store, now()).unwrap();

    for hour in 0..6 {
        store
            .append_activity(&Activity::new(
                EntityType::Project,
                project.id,
                Some(project.id),
                ActivityAction::Updated,
                ActivitySource::File,
                now() + Duration::days(1) - Duration::hours(hour),
            ))
            .unwrap();
    }
    let report = engine
        .recompute_all(&store, now() + Duration::days(1))
        .unwrap();
    assert_eq!(report.transitions[0].to, ProjectStatus::Active);

    let revived = store.get_project(project.id).unwrap().unwrap();
    assert_eq!(revived.status, ProjectStatus::Active);
    assert!(revived.stalled_since.is_none());
    assert_eq!(revived.trend, MomentumTrend::Rising);
    assert!(revived.momentum_score >= 0.0 && revived.momentum_score <= 1.0);
}

#[test]
fn one_broken_project_does_not_stop_the_run() {
    let store = store();
    let engine = MomentumEngine::new(&EngineConfig::default());
    let healthy = project_idle_for(&store, "Healthy", 1);
    let broken = project_idle_for(&store, "Broken", 1);
    store
        .connection()
        .execute(
            "INSERT INTO activities (uuid, entity_type, entity_uuid, project_uuid, action, source, occurred_at)
             VALUES ('bad-row', 'project', ?1, ?1, 'exploded', 'file', 0);",
            [broken.id.to_string()],
        )
        .unwrap();

    let report = engine.recompute_all(&store, now()).unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.failed, 1);
    let scored = store.get_project(healthy.id).unwrap().unwrap();
    assert!(scored.previous_momentum.is_some());
}

#[test]
fn untracked_projects_are_left_alone() {
    let store = store();
    let engine = MomentumEngine::new(&EngineConfig::default());
    let mut paused = Project::new("Paused", now() - Duration::days(90));
    paused.status = ProjectStatus::OnHold;
    store.create_project(&paused).unwrap();

    let report = engine.recompute_all(&store, now()).unwrap();
    assert_eq!(report.evaluated, 0);
    assert_eq!(
        store.get_project(paused.id).unwrap().unwrap().status,
        ProjectStatus::OnHold
    );
}

#[test]
fn ranking_reads_the_store_and_puts_unstuck_first() {
    let store = store();
    let engine = MomentumEngine::new(&EngineConfig::default());
    let stalled = project_idle_for(&store, "Novel", 20);
    store
        .create_task(&Task::new(stalled.id, "Outline chapter 3", now() - Duration::days(30)))
        .unwrap();
    let busy = project_idle_for(&store, "Move house", 0);
    let mut boxes = Task::new(busy.id, "Pack books", now());
    boxes.set_status(TaskStatus::InProgress, now());
    store.create_task(&boxes).unwrap();
    engine.recompute_all(&store, now()).unwrap();

    let ranked = engine
        .rank(&store, &RankFilters::default(), now())
        .unwrap();
    assert_eq!(ranked[0].tier, RankTier::Unstuck);
    assert_eq!(ranked[0].project_id, stalled.id);
    assert!(ranked.iter().all(|item| item.task.title != "Outline chapter 3"));
    assert!(ranked.iter().any(|item| item.task.title == "Pack books"));

    let first = engine.rank(&store, &RankFilters::default(), now()).unwrap();
    assert_eq!(first, ranked);
}

#[test]
fn prune_keeps_the_frequency_window() {
    let store = store();
    let engine = MomentumEngine::new(&EngineConfig::default());
    let project = project_idle_for(&store, "Log", 1);
    for days in [1, 10, 40, 100] {
        store
            .append_activity(&Activity::new(
                EntityType::Project,
                project.id,
                Some(project.id),
                ActivityAction::Updated,
                ActivitySource::Store,
                now() - Duration::days(days),
            ))
            .unwrap();
    }

    assert_eq!(engine.prune_activity(&store, 3, now()).unwrap(), 2);
    let left = store.list_activities(&ActivityQuery::default()).unwrap();
    assert_eq!(left.len(), 2);
}

#[test]
fn recompute_then_push_refreshes_the_file_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("launch.md");
    fs::write(
        &path,
        "---\ntitle: Launch Website\nstatus: active\nmomentum_score: 0.000\n---\n\n# Launch Website\n\n## Next Actions\n- [ ] Pick hosting <!-- marker:abc123 -->\n",
    )
    .unwrap();
    let sync = SyncEngine::new(store(), &EngineConfig::default(), PathLocks::new()).unwrap();
    let project_id = match sync.pull(&path).unwrap() {
        PullOutcome::Applied(summary) => summary.project_id,
        other => panic!("expected applied pull, got {other:?}"),
    };

    let engine = MomentumEngine::new(&EngineConfig::default());
    let report = engine.recompute_all(sync.store(), Utc::now()).unwrap();
    assert_eq!(report.changed_projects, vec![project_id]);

    assert!(matches!(
        sync.push(project_id).unwrap(),
        PushOutcome::Written { .. }
    ));
    let project = sync.store().get_project(project_id).unwrap().unwrap();
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains(&format!("momentum_score: {}", project.momentum_score)));
    assert!(content.contains("- [ ] Pick hosting <!-- marker:abc123 -->"));
    assert_eq!(sync.pull(&path).unwrap(), PullOutcome::Unchanged);
}
