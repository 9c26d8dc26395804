use thiserror::Error;

use crate::core::{TaskId, TaskStatus, WorkerId};

/// Coarse classification of failures, used by callers deciding whether to
/// retry, report or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown id or malformed input.
    Validation,
    /// The operation does not fit the current task or worker state.
    StateConflict,
    /// Dependency edge rejected (cycle).
    Dependency,
    /// Durable store or file I/O failure.
    Persistence,
    /// Runtime plumbing (timeouts, join errors, environment).
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Cannot {action} task {task_id} while it is {status}")]
    InvalidTransition {
        task_id: TaskId,
        status: TaskStatus,
        action: &'static str,
    },

    #[error("Task {task_id} is not assigned to worker {worker_id}")]
    NotAssigned { task_id: TaskId, worker_id: WorkerId },

    #[error("Worker {worker_id} already holds task {task_id}")]
    WorkerBusy { worker_id: WorkerId, task_id: TaskId },

    #[error("Worker {worker_id} has no capability required by task {task_id}")]
    CapabilityMismatch { worker_id: WorkerId, task_id: TaskId },

    #[error("Task {task_id} has unfinished dependencies")]
    DependenciesUnsatisfied { task_id: TaskId },

    #[error("Dependency of {dependent} on {prerequisite} would create a cycle")]
    DependencyCycle {
        dependent: TaskId,
        prerequisite: TaskId,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::TaskNotFound(_) | Error::WorkerNotFound(_) => {
                ErrorKind::Validation
            }
            Error::InvalidTransition { .. }
            | Error::NotAssigned { .. }
            | Error::WorkerBusy { .. }
            | Error::CapabilityMismatch { .. }
            | Error::DependenciesUnsatisfied { .. } => ErrorKind::StateConflict,
            Error::DependencyCycle { .. } => ErrorKind::Dependency,
            Error::Persistence(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_) => ErrorKind::Persistence,
            Error::Timeout(_) | Error::TaskJoin(_) | Error::NoHomeDir => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
