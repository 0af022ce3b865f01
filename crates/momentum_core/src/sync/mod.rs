//! Bidirectional file/store synchronization.
//!
//! # Responsibility
//! - Detect file changes by content fingerprint and apply them to the store.
//! - Regenerate files from the store and write them atomically.
//! - Surface concurrent edits on both sides as conflicts.
//!
//! # Invariants
//! - Equal fingerprints never cause a store or file mutation.
//! - One file's failure never aborts a batch scan.
//! - Pull and push of the same file are serialized through [`PathLocks`].

pub mod apply;
pub mod engine;
pub mod fingerprint;
pub mod fs;
pub mod lock;

use crate::model::project::ProjectId;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub use apply::PullSummary;
pub use engine::{PullOutcome, PushOutcome, Resolution, ScanReport, SyncEngine, SyncSummary};
pub use fingerprint::fingerprint;
pub use fs::atomic_write;
pub use lock::{PathGuard, PathLocks};

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug)]
pub enum SyncError {
    Repo(RepoError),
    /// Another sync of the same file held the lock past the timeout.
    Busy(PathBuf),
    /// The project has no linked file to push to.
    NotLinked(ProjectId),
    Config(String),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Busy(path) => write!(f, "file is busy: {}", path.display()),
            Self::NotLinked(id) => write!(f, "project {id} has no linked file"),
            Self::Config(message) => write!(f, "invalid sync config: {message}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Busy(_) | Self::NotLinked(_) | Self::Config(_) => None,
        }
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}
