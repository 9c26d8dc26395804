//! Worker data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::task::TaskId;

/// Caller-chosen identifier for a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Busy,
    /// Missed heartbeats; revived by the next heartbeat.
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Completion statistics for a worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub completed: u64,
    pub failed: u64,
    pub average_completion_seconds: f64,
    /// `completed / (completed + failed)`, 0 before the first outcome.
    pub success_rate: f64,
}

impl PerformanceStats {
    /// Fold one successful completion into the rolling average.
    pub fn record_completion(&mut self, seconds: f64) {
        self.completed += 1;
        let n = self.completed as f64;
        self.average_completion_seconds += (seconds - self.average_completion_seconds) / n;
        self.refresh_rate();
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.refresh_rate();
    }

    fn refresh_rate(&mut self) {
        let total = self.completed + self.failed;
        self.success_rate = if total == 0 {
            0.0
        } else {
            self.completed as f64 / total as f64
        };
    }
}

/// An execution agent with a capability set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub capabilities: BTreeSet<String>,
    pub status: WorkerStatus,
    /// Mirrors the `assigned_worker` of exactly one in-progress task.
    pub current_task: Option<TaskId>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub stats: PerformanceStats,
    #[serde(default)]
    pub revision: u64,
}

impl Worker {
    pub fn new(id: WorkerId, name: &str, capabilities: BTreeSet<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            capabilities,
            status: WorkerStatus::Idle,
            current_task: None,
            registered_at: now,
            last_heartbeat: now,
            stats: PerformanceStats::default(),
            revision: 0,
        }
    }

    /// Record liveness. An offline worker without a task comes back idle.
    pub fn touch(&mut self) {
        self.last_heartbeat = Utc::now();
        if self.status == WorkerStatus::Offline {
            self.status = if self.current_task.is_some() {
                WorkerStatus::Busy
            } else {
                WorkerStatus::Idle
            };
        }
    }

    pub fn assign(&mut self, task_id: TaskId) {
        self.status = WorkerStatus::Busy;
        self.current_task = Some(task_id);
    }

    /// Drop the current task. Offline workers stay offline.
    pub fn release(&mut self) {
        self.current_task = None;
        if self.status == WorkerStatus::Busy {
            self.status = WorkerStatus::Idle;
        }
    }

    pub fn mark_offline(&mut self) {
        self.status = WorkerStatus::Offline;
    }

    /// Copy for the durable mirror; see [`crate::core::Task::checkpoint`].
    pub fn checkpoint(&mut self) -> Worker {
        self.revision += 1;
        self.clone()
    }

    /// True when the last heartbeat is older than `timeout` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now - self.last_heartbeat > timeout
    }
}
