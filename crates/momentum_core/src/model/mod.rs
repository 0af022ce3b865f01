//! Domain model for projects, tasks and their sync bookkeeping.
//!
//! # Responsibility
//! - Define canonical records shared by the store, the document layer and
//!   the sync/momentum engines.
//! - Keep enum <-> text mappings in one place so headers, SQL rows and
//!   logs agree on spelling.
//!
//! # Invariants
//! - Every record is identified by a stable UUID.
//! - Task deletion is a tombstone; the marker of a deleted task is never
//!   handed to another task.

pub mod activity;
pub mod area;
pub mod project;
pub mod sync_state;
pub mod task;
