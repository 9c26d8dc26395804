//! Task data model.
//!
//! Tasks are the atomic units of work claimed by workers. Each task tracks
//! its status, assignment, progress, prerequisites, and a log of notes left
//! by whoever worked on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

use super::dag::DependencyType;
use super::worker::WorkerId;

/// Author recorded on notes written by the coordinator itself.
pub const SYSTEM_AUTHOR: &str = "system";

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Scheduling priority. Declaration order is the claim order: `Critical`
/// sorts first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Task status in its lifecycle.
///
/// `Pending -> InProgress -> Completed | Failed`. Failed tasks only return
/// to `Pending` through an explicit requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    #[default]
    Pending,
    /// Claimed by exactly one worker.
    InProgress,
    /// Finished with progress at 100.
    Completed,
    /// Abandoned by its worker or reclaimed after a timeout.
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of a task's implementation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationNote {
    pub timestamp: DateTime<Utc>,
    /// Worker id, or [`SYSTEM_AUTHOR`] for coordinator-generated notes.
    pub author: String,
    pub text: String,
}

/// A discrete unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable name for the task.
    pub name: String,
    /// Detailed description of what the task should accomplish.
    pub description: String,
    pub priority: Priority,
    /// Current execution status.
    pub status: TaskStatus,
    /// Capabilities of which a worker needs at least one.
    pub required_capabilities: BTreeSet<String>,
    /// Worker holding the task; set iff status is `InProgress`.
    pub assigned_worker: Option<WorkerId>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last claimed.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task completed or failed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Percent complete, 0..=100.
    pub progress: u8,
    /// Tasks that must complete before this one can be claimed.
    pub dependencies: BTreeSet<TaskId>,
    /// Label of every dependency added by conflict resolution. Declared
    /// dependencies have no entry.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependency_origins: BTreeMap<TaskId, DependencyType>,
    pub implementation_notes: Vec<ImplementationNote>,
    /// Hex SHA-256 over normalized name, description and capabilities.
    pub signature_hash: String,
    pub estimated_duration: Duration,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Bumped on every durable write; the mirror drops older revisions.
    #[serde(default)]
    pub revision: u64,
}

impl Task {
    /// Create a new pending task. The signature hash is derived here and
    /// never recomputed, since name, description and capabilities are fixed.
    pub fn new(
        name: &str,
        description: &str,
        priority: Priority,
        required_capabilities: BTreeSet<String>,
        estimated_duration: Duration,
    ) -> Self {
        let signature_hash = signature_hash(name, description, &required_capabilities);
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            description: description.to_string(),
            priority,
            status: TaskStatus::Pending,
            required_capabilities,
            assigned_worker: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            dependencies: BTreeSet::new(),
            dependency_origins: BTreeMap::new(),
            implementation_notes: Vec::new(),
            signature_hash,
            estimated_duration,
            failure_reason: None,
            revision: 0,
        }
    }

    /// Hand the task to a worker.
    pub fn start(&mut self, worker_id: &WorkerId) {
        self.status = TaskStatus::InProgress;
        self.assigned_worker = Some(worker_id.clone());
        self.started_at = Some(Utc::now());
    }

    /// Raise progress to `progress` (clamped to 100). Lower values are
    /// ignored; returns the resulting progress.
    pub fn advance(&mut self, progress: u8) -> u8 {
        self.progress = self.progress.max(progress.min(100));
        self.progress
    }

    /// Mark the task as successfully completed.
    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.assigned_worker = None;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as failed, recording the reason.
    pub fn fail(&mut self, reason: &str) {
        self.status = TaskStatus::Failed;
        self.assigned_worker = None;
        self.failure_reason = Some(reason.to_string());
        self.completed_at = Some(Utc::now());
    }

    /// Put a failed task back into the backlog.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
        self.progress = 0;
        self.started_at = None;
        self.completed_at = None;
        self.failure_reason = None;
    }

    pub fn add_note(&mut self, author: &str, text: &str) {
        self.implementation_notes.push(ImplementationNote {
            timestamp: Utc::now(),
            author: author.to_string(),
            text: text.to_string(),
        });
    }

    /// Pending or in progress; the working set conflict analysis looks at.
    pub fn is_live(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::InProgress)
    }

    /// Record a dependency and, unless it was declared, where it came from.
    pub fn add_dependency(&mut self, prerequisite: TaskId, origin: &DependencyType) {
        self.dependencies.insert(prerequisite);
        if *origin != DependencyType::Declared {
            self.dependency_origins.insert(prerequisite, origin.clone());
        }
    }

    /// Label of the edge to `prerequisite`.
    pub fn dependency_origin(&self, prerequisite: &TaskId) -> DependencyType {
        self.dependency_origins
            .get(prerequisite)
            .cloned()
            .unwrap_or_default()
    }

    /// Copy for the durable mirror, taken with the entry locked so
    /// revisions follow the order of the writes.
    pub fn checkpoint(&mut self) -> Task {
        self.revision += 1;
        self.clone()
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            name: self.name.clone(),
            priority: self.priority,
            status: self.status,
            required_capabilities: self.required_capabilities.clone(),
            progress: self.progress,
            assigned_worker: self.assigned_worker.clone(),
            dependencies: self.dependencies.len(),
            created_at: self.created_at,
        }
    }
}

/// Lightweight view of a task handed to polling workers and status sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub required_capabilities: BTreeSet<String>,
    pub progress: u8,
    pub assigned_worker: Option<WorkerId>,
    pub dependencies: usize,
    pub created_at: DateTime<Utc>,
}

/// Duplicate-detection hash. Whitespace and case differences in name and
/// description do not change it.
pub fn signature_hash(name: &str, description: &str, capabilities: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(name).as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize(description).as_bytes());
    hasher.update(b"\n");
    let caps: Vec<&str> = capabilities.iter().map(String::as_str).collect();
    hasher.update(caps.join(",").as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
