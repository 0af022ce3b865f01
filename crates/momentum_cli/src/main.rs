//! `momentum`: plain entry points over the sync and momentum engines.
//!
//! # Responsibility
//! - Load config, bootstrap logging and open the store.
//! - Expose one subcommand per engine operation so a scheduler or a user
//!   can drive scans, pushes, recomputes and rankings.
//!
//! ## Subcommands
//!
//! - `scan`: pull every tracked file under the configured roots
//! - `pull` / `push`: sync one file or one project
//! - `resolve`: clear a conflict by keeping one side
//! - `recompute`: rescore projects and write changed headers back
//! - `next`: ranked list of what to work on
//! - `add` / `done`: store-side task edits, pushed immediately
//! - `watch`: follow file and folder events until stdin closes
//! - `status`: sync-state overview or one file's state
//! - `prune`: drop old activity entries

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use momentum_core::config::EngineConfig;
use momentum_core::db::open_db;
use momentum_core::model::project::ProjectId;
use momentum_core::model::sync_state::SyncStatus;
use momentum_core::model::task::{TaskId, TaskType};
use momentum_core::momentum::{MomentumEngine, RankFilters};
use momentum_core::repo::SqliteStore;
use momentum_core::service::TaskService;
use momentum_core::sync::{PathLocks, PullOutcome, PushOutcome, Resolution, SyncEngine};
use momentum_core::watch::FileWatcher;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "momentum")]
#[command(about = "Markdown project tracker: sync and momentum engine")]
#[command(version)]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overrides `store.db_path`
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull every tracked file under the roots
    Scan {
        /// Roots to scan; defaults to `watch.roots`
        roots: Vec<PathBuf>,
    },

    /// Pull one file into the store
    Pull { path: PathBuf },

    /// Write one project's store state to its file
    Push { project_id: ProjectId },

    /// Resolve a conflict recorded for a file
    Resolve {
        /// File path or sync-state id
        target: String,

        #[arg(long, value_enum)]
        keep: Side,
    },

    /// Rescore tracked projects
    Recompute {
        /// Skip writing changed headers back to files
        #[arg(long)]
        no_push: bool,
    },

    /// Show the ranked next actions
    Next {
        #[arg(long)]
        context: Option<String>,

        #[arg(long)]
        energy: Option<String>,

        /// Minutes available
        #[arg(long)]
        minutes: Option<u32>,

        #[arg(long)]
        include_stalled: bool,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Add a task to a project and write it to the file
    Add {
        project_id: ProjectId,
        title: String,

        #[arg(long, value_enum, default_value_t = Kind::Action)]
        kind: Kind,
    },

    /// Complete a task and write it to the file
    Done { task_id: TaskId },

    /// Follow file and folder events until stdin closes
    Watch {
        /// Roots to watch; defaults to `watch.roots`
        roots: Vec<PathBuf>,
    },

    /// Show sync state for one file, or a summary with open conflicts
    Status { path: Option<PathBuf> },

    /// Delete activity entries older than the given age
    Prune {
        #[arg(long, default_value_t = 90)]
        days: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    File,
    Store,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Action,
    Waiting,
    Someday,
}

impl From<Kind> for TaskType {
    fn from(value: Kind) -> Self {
        match value {
            Kind::Action => TaskType::Action,
            Kind::Waiting => TaskType::WaitingFor,
            Kind::Someday => TaskType::Someday,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!("event=cli_run module=cli status=error error={err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config `{}`", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(db) = cli.db {
        config.store.db_path = db;
    }
    momentum_core::init_logging(&config.logging).map_err(anyhow::Error::msg)?;
    info!(
        "event=cli_start module=cli status=ok version={} db={}",
        momentum_core::core_version(),
        config.store.db_path.display()
    );

    let conn = open_db(&config.store.db_path)
        .with_context(|| format!("opening store `{}`", config.store.db_path.display()))?;
    let sync = SyncEngine::new(SqliteStore::new(conn), &config, PathLocks::new())?;
    let momentum = MomentumEngine::new(&config);

    match cli.command {
        Commands::Scan { roots } => {
            let roots = roots_or_config(roots, &config)?;
            let report = sync.scan_all(&roots, &AtomicBool::new(false));
            println!(
                "seen={} created={} updated={} unchanged={} conflicts={} errors={}",
                report.files_seen,
                report.created,
                report.updated,
                report.unchanged,
                report.conflicts,
                report.errors
            );
            for (path, message) in &report.failures {
                println!("failed {}: {message}", path.display());
            }
        }
        Commands::Pull { path } => print_pull(&path, &sync.pull(&path)?),
        Commands::Push { project_id } => print_push(project_id, &sync.push(project_id)?),
        Commands::Resolve { target, keep } => {
            let state = match Uuid::parse_str(&target) {
                Ok(id) => sync
                    .list_conflicts()?
                    .into_iter()
                    .find(|state| state.id == id),
                Err(_) => sync.status(Path::new(&target))?,
            };
            let Some(state) = state else {
                bail!("no sync state found for `{target}`");
            };
            if state.status != SyncStatus::Conflict {
                bail!("`{}` is {}, not in conflict", state.file_path, state.status.as_str());
            }
            match sync.resolve(state.id, matches!(keep, Side::File))? {
                Resolution::KeptFile(outcome) => print_pull(Path::new(&state.file_path), &outcome),
                Resolution::KeptStore(outcome) => {
                    println!("kept store for {}: {}", state.file_path, describe_push(&outcome))
                }
            }
        }
        Commands::Recompute { no_push } => {
            let report = momentum.recompute_all(sync.store(), Utc::now())?;
            println!(
                "evaluated={} failed={} transitions={} unstuck_created={}",
                report.evaluated,
                report.failed,
                report.transitions.len(),
                report.unstuck_created.len()
            );
            for transition in &report.transitions {
                println!(
                    "{}: {} -> {}",
                    transition.project_id,
                    transition.from.as_str(),
                    transition.to.as_str()
                );
            }
            if !no_push {
                for project_id in &report.changed_projects {
                    print_push(*project_id, &sync.push(*project_id)?);
                }
            }
        }
        Commands::Next {
            context,
            energy,
            minutes,
            include_stalled,
            limit,
        } => {
            let filters = RankFilters {
                context,
                energy,
                time_available: minutes,
                include_stalled,
            };
            let ranked = momentum.rank(sync.store(), &filters, Utc::now())?;
            if ranked.is_empty() {
                println!("nothing to do");
            }
            for (index, item) in ranked.iter().take(limit).enumerate() {
                println!(
                    "{:>2}. [{}] {} ({}, momentum {:.2}) {}",
                    index + 1,
                    item.tier.as_u8(),
                    item.task.title,
                    item.project_title,
                    item.project_momentum,
                    item.task.id
                );
            }
        }
        Commands::Add {
            project_id,
            title,
            kind,
        } => {
            let task = TaskService::new(sync.store()).create_task(
                project_id,
                &title,
                kind.into(),
                Utc::now(),
            )?;
            println!("created {} {}", task.id, task.title);
            push_if_linked(&sync, project_id)?;
        }
        Commands::Done { task_id } => {
            let task = TaskService::new(sync.store()).complete_task(task_id, Utc::now())?;
            println!("completed {} {}", task.id, task.title);
            push_if_linked(&sync, task.project_id)?;
        }
        Commands::Watch { roots } => {
            let roots = roots_or_config(roots, &config)?;
            watch(sync, &config, roots)?;
        }
        Commands::Status { path: Some(path) } => match sync.status(&path)? {
            Some(state) => {
                println!("{} {}", state.status.as_str(), state.file_path);
                if let Some(synced) = state.last_synced_at {
                    println!("last synced {}", synced.to_rfc3339());
                }
                if let Some(message) = state.last_error {
                    println!("last error: {message}");
                }
            }
            None => println!("untracked {}", path.display()),
        },
        Commands::Status { path: None } => {
            let summary = sync.summary()?;
            println!(
                "synced={} pending={} conflict={} error={}",
                summary.synced, summary.pending, summary.conflict, summary.error
            );
            for state in sync.list_conflicts()? {
                println!("conflict {} {}", state.id, state.file_path);
            }
        }
        Commands::Prune { days } => {
            let removed = momentum.prune_activity(sync.store(), days, Utc::now())?;
            println!("removed {removed} activity entries");
        }
    }
    Ok(())
}

fn roots_or_config(roots: Vec<PathBuf>, config: &EngineConfig) -> Result<Vec<PathBuf>> {
    let roots = if roots.is_empty() {
        config.watch.roots.clone()
    } else {
        roots
    };
    if roots.is_empty() {
        bail!("no roots given and `watch.roots` is empty");
    }
    Ok(roots)
}

fn push_if_linked(sync: &SyncEngine<SqliteStore>, project_id: ProjectId) -> Result<()> {
    match sync.push(project_id) {
        Ok(outcome) => print_push(project_id, &outcome),
        Err(momentum_core::sync::SyncError::NotLinked(_)) => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

fn watch(sync: SyncEngine<SqliteStore>, config: &EngineConfig, roots: Vec<PathBuf>) -> Result<()> {
    let report = sync.scan_all(&roots, &AtomicBool::new(false));
    println!(
        "initial scan: seen={} created={} updated={} conflicts={} errors={}",
        report.files_seen, report.created, report.updated, report.conflicts, report.errors
    );

    let extension = config.sync.extension().to_string();
    let engine = Arc::new(Mutex::new(sync));
    let files = Arc::clone(&engine);
    let folders = Arc::clone(&engine);
    let mut watch_config = config.watch.clone();
    watch_config.roots = roots;

    let watcher = FileWatcher::start(
        &watch_config,
        &extension,
        move |path: &PathBuf| -> std::result::Result<(), String> {
            let engine = lock_engine(&files);
            let outcome = engine.pull(path).map_err(|err| err.to_string())?;
            print_pull(path, &outcome);
            Ok(())
        },
        move |path: &PathBuf| -> std::result::Result<(), String> {
            let engine = lock_engine(&folders);
            if let Some(area) = engine.register_folder(path).map_err(|err| err.to_string())? {
                println!("area {} <- {}", area.name, path.display());
            }
            Ok(())
        },
    )?;

    println!(
        "watching {} root(s); close stdin (Ctrl-D) to stop",
        watcher.roots().len()
    );
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if line.is_err() {
            break;
        }
    }
    watcher.shutdown();
    Ok(())
}

/// A callback that panicked while holding the engine poisons the mutex;
/// the store rolled its transaction back, so later events keep using it.
fn lock_engine(engine: &Mutex<SyncEngine<SqliteStore>>) -> MutexGuard<'_, SyncEngine<SqliteStore>> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

fn print_pull(path: &Path, outcome: &PullOutcome) {
    match outcome {
        PullOutcome::Unchanged => println!("unchanged {}", path.display()),
        PullOutcome::Applied(summary) => println!(
            "pulled {} project={} created={} updated={} deleted={} stamped={} issues={}",
            path.display(),
            summary.project_id,
            summary.tasks_created,
            summary.tasks_updated,
            summary.tasks_deleted,
            summary.markers_stamped,
            summary.issues.len()
        ),
        PullOutcome::Conflict => println!("conflict {}", path.display()),
        PullOutcome::Failed(message) => println!("failed {}: {message}", path.display()),
    }
}

fn print_push(project_id: ProjectId, outcome: &PushOutcome) {
    println!("push {project_id}: {}", describe_push(outcome));
}

fn describe_push(outcome: &PushOutcome) -> String {
    match outcome {
        PushOutcome::Unchanged => "unchanged".to_string(),
        PushOutcome::Written { markers_assigned } => {
            format!("written, {markers_assigned} new marker(s)")
        }
        PushOutcome::Pulled(summary) => format!(
            "file changed; pulled {} change(s)",
            summary.tasks_created + summary.tasks_updated + summary.tasks_deleted
        ),
        PushOutcome::Conflict => "conflict".to_string(),
        PushOutcome::Failed(message) => format!("failed: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::{lock_engine, Cli, Commands, Kind, Side};
    use clap::Parser;
    use momentum_core::config::EngineConfig;
    use momentum_core::db::open_db_in_memory;
    use momentum_core::model::task::TaskType;
    use momentum_core::repo::SqliteStore;
    use momentum_core::sync::{PathLocks, SyncEngine};
    use std::sync::{Arc, Mutex};

    #[test]
    fn parses_ranking_filters() {
        let cli = Cli::parse_from([
            "momentum",
            "--db",
            "/tmp/m.sqlite3",
            "next",
            "--context",
            "home",
            "--minutes",
            "15",
        ]);
        match cli.command {
            Commands::Next {
                context, minutes, limit, ..
            } => {
                assert_eq!(context.as_deref(), Some("home"));
                assert_eq!(minutes, Some(15));
                assert_eq!(limit, 10);
            }
            _ => panic!("expected next"),
        }
    }

    #[test]
    fn parses_resolve_side_and_task_kind() {
        let cli = Cli::parse_from(["momentum", "resolve", "notes/a.md", "--keep", "store"]);
        assert!(matches!(
            cli.command,
            Commands::Resolve {
                keep: Side::Store,
                ..
            }
        ));
        assert_eq!(TaskType::from(Kind::Waiting), TaskType::WaitingFor);
    }

    #[test]
    fn poisoned_engine_keeps_serving_events() {
        let store = SqliteStore::new(open_db_in_memory().expect("db should open"));
        let engine = SyncEngine::new(store, &EngineConfig::default(), PathLocks::new())
            .expect("engine should build");
        let shared = Arc::new(Mutex::new(engine));

        let poisoner = Arc::clone(&shared);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.lock().expect("first lock");
            panic!("callback failed");
        })
        .join();
        assert!(joined.is_err());
        assert!(shared.is_poisoned());

        let summary = lock_engine(&shared).summary().expect("engine still usable");
        assert_eq!(summary.conflict, 0);
    }
}
