//! Point-in-time system snapshot for dashboards and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::{
    PerformanceStats, Task, TaskId, TaskStatus, TaskSummary, Worker, WorkerId, WorkerStatus,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounts {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub name: String,
    pub status: WorkerStatus,
    pub capabilities: BTreeSet<String>,
    pub current_task: Option<TaskId>,
    pub last_heartbeat: DateTime<Utc>,
    pub stats: PerformanceStats,
}

impl From<&Worker> for WorkerSummary {
    fn from(worker: &Worker) -> Self {
        Self {
            id: worker.id.clone(),
            name: worker.name.clone(),
            status: worker.status,
            capabilities: worker.capabilities.clone(),
            current_task: worker.current_task,
            last_heartbeat: worker.last_heartbeat,
            stats: worker.stats.clone(),
        }
    }
}

/// Everything `get_system_status` reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub generated_at: DateTime<Utc>,
    pub tasks: TaskCounts,
    pub workers: WorkerCounts,
    pub dependency_edges: usize,
    /// Edge counts keyed by kind: declared, overlap, capability_sequence.
    pub dependency_edges_by_kind: BTreeMap<String, usize>,
    /// Durable writes that failed since startup.
    pub persistence_failures: u64,
    /// Tasks in claim order: priority, then creation time.
    pub task_summaries: Vec<TaskSummary>,
    pub worker_summaries: Vec<WorkerSummary>,
}

impl SystemStatus {
    pub fn build(
        tasks: &[Task],
        workers: &[Worker],
        dependency_edges_by_kind: BTreeMap<String, usize>,
        persistence_failures: u64,
    ) -> Self {
        let mut task_counts = TaskCounts {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            match task.status {
                TaskStatus::Pending => task_counts.pending += 1,
                TaskStatus::InProgress => task_counts.in_progress += 1,
                TaskStatus::Completed => task_counts.completed += 1,
                TaskStatus::Failed => task_counts.failed += 1,
            }
        }

        let mut worker_counts = WorkerCounts {
            total: workers.len(),
            ..Default::default()
        };
        for worker in workers {
            match worker.status {
                WorkerStatus::Idle => worker_counts.idle += 1,
                WorkerStatus::Busy => worker_counts.busy += 1,
                WorkerStatus::Offline => worker_counts.offline += 1,
            }
        }

        let mut task_summaries: Vec<TaskSummary> = tasks.iter().map(Task::summary).collect();
        task_summaries.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        let mut worker_summaries: Vec<WorkerSummary> =
            workers.iter().map(WorkerSummary::from).collect();
        worker_summaries.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            generated_at: Utc::now(),
            tasks: task_counts,
            workers: worker_counts,
            dependency_edges: dependency_edges_by_kind.values().sum(),
            dependency_edges_by_kind,
            persistence_failures,
            task_summaries,
            worker_summaries,
        }
    }
}
