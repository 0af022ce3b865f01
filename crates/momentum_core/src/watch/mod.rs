//! File-system observation.
//!
//! # Responsibility
//! - Coalesce bursty events into one callback per path after a quiet period.
//! - Route tracked-file and folder events to their own debouncers.
//!
//! # Invariants
//! - Callback failures are logged and never stop observation.

pub mod watcher;

pub use watcher::{classify_event, FileWatcher, WatchError, WatchTarget};
