//! `notify`-backed observer of the tracked roots.
//!
//! # Responsibility
//! - Watch every configured root recursively through two
//!   `notify_debouncer_mini` debouncers: one for tracked files, one with a
//!   coarser quiet period for folders.
//! - Hand each settled path to its callback.
//!
//! # Invariants
//! - Callbacks fire only for settled (`Any`) events; `AnyContinuous`
//!   reports of a path still being written are dropped.
//! - Hidden, backup and temp files never reach a callback.
//! - Vanished paths are ignored; a removed file surfaces on the next scan.
//! - A failing or panicking callback is logged and observation continues.

use crate::config::WatchConfig;
use log::{error, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug)]
pub enum WatchError {
    Notify(notify::Error),
    InvalidPattern(regex::Error),
    MissingRoot(PathBuf),
}

impl Display for WatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notify(err) => write!(f, "file watcher error: {err}"),
            Self::InvalidPattern(err) => write!(f, "invalid folder pattern: {err}"),
            Self::MissingRoot(path) => write!(f, "watch root `{}` does not exist", path.display()),
        }
    }
}

impl Error for WatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Notify(err) => Some(err),
            Self::InvalidPattern(err) => Some(err),
            Self::MissingRoot(_) => None,
        }
    }
}

impl From<notify::Error> for WatchError {
    fn from(value: notify::Error) -> Self {
        Self::Notify(value)
    }
}

/// What a settled path should wake up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    File(PathBuf),
    Folder(PathBuf),
}

/// Maps one debounced event to a callback target.
///
/// Only settled events count. Existing tracked files become
/// [`WatchTarget::File`]; existing folders whose name matches
/// `folder_pattern` become [`WatchTarget::Folder`].
pub fn classify_event(
    path: &Path,
    kind: DebouncedEventKind,
    extension: &str,
    folder_pattern: &Regex,
) -> Option<WatchTarget> {
    if kind != DebouncedEventKind::Any || is_ignored(path) {
        return None;
    }
    if path.is_dir() {
        let name = path.file_name()?.to_str()?;
        return folder_pattern
            .is_match(name)
            .then(|| WatchTarget::Folder(path.to_path_buf()));
    }
    (path.is_file() && has_extension(path, extension)).then(|| WatchTarget::File(path.to_path_buf()))
}

fn is_ignored(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return true;
    };
    name.starts_with('.')
        || name.ends_with('~')
        || name.ends_with(".tmp")
        || name.ends_with(".swp")
}

pub(crate) fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case(extension))
}

/// Running observer. Dropping it stops observation.
pub struct FileWatcher {
    files: Debouncer<RecommendedWatcher>,
    folders: Debouncer<RecommendedWatcher>,
    roots: Vec<PathBuf>,
}

impl FileWatcher {
    /// Starts watching `config.roots`.
    ///
    /// `on_file` receives tracked files after `debounce_ms` of quiet,
    /// `on_folder` receives matching folders after `folder_debounce_ms`.
    ///
    /// # Errors
    /// - Returns [`WatchError::MissingRoot`] when a root does not exist.
    /// - Returns pattern and backend failures.
    pub fn start<F, G, E1, E2>(
        config: &WatchConfig,
        extension: &str,
        mut on_file: F,
        mut on_folder: G,
    ) -> Result<Self, WatchError>
    where
        F: FnMut(&PathBuf) -> Result<(), E1> + Send + 'static,
        G: FnMut(&PathBuf) -> Result<(), E2> + Send + 'static,
        E1: Display,
        E2: Display,
    {
        if let Some(missing) = config.roots.iter().find(|root| !root.exists()) {
            return Err(WatchError::MissingRoot(missing.clone()));
        }
        let folder_pattern =
            Regex::new(&config.folder_pattern).map_err(WatchError::InvalidPattern)?;

        let file_extension = extension.to_string();
        let file_pattern = folder_pattern.clone();
        let mut files = new_debouncer(
            Duration::from_millis(config.debounce_ms),
            move |result: DebounceEventResult| {
                for path in settled_paths(result, "files") {
                    if let Some(WatchTarget::File(path)) =
                        classify_event(&path, DebouncedEventKind::Any, &file_extension, &file_pattern)
                    {
                        dispatch("files", &path, &mut on_file);
                    }
                }
            },
        )?;

        let folder_extension = extension.to_string();
        let mut folders = new_debouncer(
            Duration::from_millis(config.folder_debounce_ms),
            move |result: DebounceEventResult| {
                for path in settled_paths(result, "folders") {
                    if let Some(WatchTarget::Folder(path)) = classify_event(
                        &path,
                        DebouncedEventKind::Any,
                        &folder_extension,
                        &folder_pattern,
                    ) {
                        dispatch("folders", &path, &mut on_folder);
                    }
                }
            },
        )?;

        for root in &config.roots {
            files.watcher().watch(root, RecursiveMode::Recursive)?;
            folders.watcher().watch(root, RecursiveMode::Recursive)?;
            info!(
                "event=watch_root module=watch status=ok path={}",
                root.display()
            );
        }

        Ok(Self {
            files,
            folders,
            roots: config.roots.clone(),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Stops both debouncers. Pending paths are dropped.
    pub fn shutdown(self) {
        let Self {
            files,
            folders,
            roots,
        } = self;
        drop(files);
        drop(folders);
        info!(
            "event=watch_stop module=watch status=ok roots={}",
            roots.len()
        );
    }
}

/// Paths of the settled events in one debouncer batch.
fn settled_paths(result: DebounceEventResult, name: &str) -> Vec<PathBuf> {
    match result {
        Ok(events) => events
            .into_iter()
            .filter(|event| event.kind == DebouncedEventKind::Any)
            .map(|event| event.path)
            .collect(),
        Err(err) => {
            warn!("event=watch_event module=watch status=error name={name} error={err}");
            Vec::new()
        }
    }
}

fn dispatch<F, E>(name: &str, path: &PathBuf, callback: &mut F)
where
    F: FnMut(&PathBuf) -> Result<(), E>,
    E: Display,
{
    match catch_unwind(AssertUnwindSafe(|| callback(path))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(
            "event=watch_callback module=watch status=error name={} path={} error={}",
            name,
            path.display(),
            err
        ),
        Err(_) => error!(
            "event=watch_callback module=watch status=panic name={} path={}",
            name,
            path.display()
        ),
    }
}
