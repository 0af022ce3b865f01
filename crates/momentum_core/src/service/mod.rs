//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep CLI callers decoupled from storage details.

pub mod task_service;

pub use task_service::{ServiceError, ServiceResult, TaskService};
