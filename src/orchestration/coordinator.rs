//! Claim state machine.
//!
//! ```text
//! Pending --claim--> InProgress --progress 100 / complete--> Completed
//!    ^                   |
//!    |                   +--fail (assignee or liveness)--> Failed
//!    +-------------------------------requeue-----------------+
//! ```
//!
//! Every transition holds the task's lock across the whole
//! read-check-write, so two workers racing for one task cannot both win.
//! When a worker is touched as well, its lock is taken after the task's.

use std::sync::Arc;

use chrono::Utc;

use crate::core::task::SYSTEM_AUTHOR;
use crate::core::{Task, TaskId, TaskStatus, Worker, WorkerId};
use crate::store::{SharedWorker, TaskStore};
use crate::{Error, Result};

use super::matcher;

/// Who is ending a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// A worker; it must be the task's assignee.
    Worker(WorkerId),
    /// The coordinator itself, e.g. after a heartbeat timeout.
    System,
}

impl Caller {
    fn author(&self) -> &str {
        match self {
            Caller::Worker(id) => id.as_str(),
            Caller::System => SYSTEM_AUTHOR,
        }
    }
}

impl From<WorkerId> for Caller {
    fn from(id: WorkerId) -> Self {
        Caller::Worker(id)
    }
}

fn ensure_status(task: &Task, expected: TaskStatus, action: &'static str) -> Result<()> {
    if task.status != expected {
        return Err(Error::InvalidTransition {
            task_id: task.id,
            status: task.status,
            action,
        });
    }
    Ok(())
}

fn ensure_assignee(task: &Task, worker_id: &WorkerId) -> Result<()> {
    if task.assigned_worker.as_ref() != Some(worker_id) {
        return Err(Error::NotAssigned {
            task_id: task.id,
            worker_id: worker_id.clone(),
        });
    }
    Ok(())
}

pub struct ClaimCoordinator {
    store: Arc<TaskStore>,
}

impl ClaimCoordinator {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// Record liveness for a worker, reviving it if it was offline.
    pub async fn heartbeat(&self, worker_id: &WorkerId) -> Result<()> {
        let entry = self.store.require_worker(worker_id).await?;
        self.touch(&entry).await;
        Ok(())
    }

    async fn touch(&self, entry: &SharedWorker) {
        let mut worker = entry.lock().await;
        worker.touch();
    }

    /// Give `task_id` to `worker_id`.
    ///
    /// # Errors
    /// - `InvalidTransition` if the task is not pending
    /// - `DependenciesUnsatisfied` if a prerequisite is not completed
    /// - `CapabilityMismatch` if the worker offers none of the required
    ///   capabilities
    /// - `WorkerBusy` if the worker already holds a task
    pub async fn claim(&self, worker_id: &WorkerId, task_id: &TaskId) -> Result<()> {
        let task_entry = self.store.require_task(task_id).await?;
        let worker_entry = self.store.require_worker(worker_id).await?;
        self.touch(&worker_entry).await;

        let (task, worker) = {
            let mut task = task_entry.lock().await;
            ensure_status(&task, TaskStatus::Pending, "claim")?;
            if !matcher::dependencies_satisfied(&task, &self.store).await {
                return Err(Error::DependenciesUnsatisfied { task_id: *task_id });
            }

            let mut worker = worker_entry.lock().await;
            if !matcher::can_handle(&worker.capabilities, &task.required_capabilities) {
                return Err(Error::CapabilityMismatch {
                    worker_id: worker_id.clone(),
                    task_id: *task_id,
                });
            }
            if let Some(held) = worker.current_task {
                return Err(Error::WorkerBusy {
                    worker_id: worker_id.clone(),
                    task_id: held,
                });
            }

            task.start(worker_id);
            worker.assign(*task_id);
            self.store.mark_claimed(task_id).await;
            (task.checkpoint(), worker.checkpoint())
        };

        tracing::info!(task = %task_id, worker = %worker_id, name = %task.name, "task claimed");
        self.store.persist_task(&task).await;
        self.store.persist_worker(&worker).await;
        Ok(())
    }

    /// Raise the task's progress. Values are clamped to 0..=100 and never
    /// lower the current progress; reaching 100 completes the task.
    ///
    /// Returns the task's status after the update.
    pub async fn update_progress(
        &self,
        worker_id: &WorkerId,
        task_id: &TaskId,
        progress: i64,
        notes: Option<&str>,
    ) -> Result<TaskStatus> {
        let task_entry = self.store.require_task(task_id).await?;
        let worker_entry = self.store.require_worker(worker_id).await?;
        self.touch(&worker_entry).await;

        let (task, worker) = {
            let mut task = task_entry.lock().await;
            ensure_status(&task, TaskStatus::InProgress, "update progress of")?;
            ensure_assignee(&task, worker_id)?;

            let value = progress.clamp(0, 100) as u8;
            let now = task.advance(value);
            if let Some(text) = notes {
                task.add_note(worker_id.as_str(), text);
            }
            tracing::debug!(task = %task_id, worker = %worker_id, progress = now, "progress updated");

            let worker = if now == 100 {
                Some(self.finish(&mut task, &worker_entry).await)
            } else {
                None
            };
            (task.checkpoint(), worker)
        };

        self.store.persist_task(&task).await;
        if let Some(worker) = worker {
            tracing::info!(task = %task_id, worker = %worker_id, "task completed");
            self.store.persist_worker(&worker).await;
        }
        Ok(task.status)
    }

    /// Complete the task regardless of its current progress; progress is
    /// forced to 100.
    pub async fn complete(
        &self,
        worker_id: &WorkerId,
        task_id: &TaskId,
        notes: Option<&str>,
    ) -> Result<()> {
        let task_entry = self.store.require_task(task_id).await?;
        let worker_entry = self.store.require_worker(worker_id).await?;
        self.touch(&worker_entry).await;

        let (task, worker) = {
            let mut task = task_entry.lock().await;
            ensure_status(&task, TaskStatus::InProgress, "complete")?;
            ensure_assignee(&task, worker_id)?;
            if let Some(text) = notes {
                task.add_note(worker_id.as_str(), text);
            }
            let worker = self.finish(&mut task, &worker_entry).await;
            (task.checkpoint(), worker)
        };

        tracing::info!(task = %task_id, worker = %worker_id, "task completed");
        self.store.persist_task(&task).await;
        self.store.persist_worker(&worker).await;
        Ok(())
    }

    /// Shared completion path. Caller holds the task lock. The worker is only
    /// released if its record still points at this task.
    async fn finish(&self, task: &mut Task, worker_entry: &SharedWorker) -> Worker {
        let elapsed = task
            .started_at
            .map(|started| (Utc::now() - started).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        task.complete();

        let mut worker = worker_entry.lock().await;
        if worker.current_task == Some(task.id) {
            worker.release();
        }
        worker.stats.record_completion(elapsed);
        worker.checkpoint()
    }

    /// Move an in-progress task to `Failed` and free its worker. The task
    /// is not requeued.
    pub async fn fail(&self, caller: &Caller, task_id: &TaskId, reason: &str) -> Result<()> {
        let task_entry = self.store.require_task(task_id).await?;
        if let Caller::Worker(worker_id) = caller {
            let entry = self.store.require_worker(worker_id).await?;
            self.touch(&entry).await;
        }

        let (task, worker) = {
            let mut task = task_entry.lock().await;
            ensure_status(&task, TaskStatus::InProgress, "fail")?;
            if let Caller::Worker(worker_id) = caller {
                ensure_assignee(&task, worker_id)?;
            }

            let holder = task.assigned_worker.clone();
            task.add_note(caller.author(), &format!("failed: {}", reason));
            task.fail(reason);

            let worker = match holder {
                Some(holder) => match self.store.worker(&holder).await {
                    Some(entry) => {
                        let mut worker = entry.lock().await;
                        if worker.current_task == Some(*task_id) {
                            worker.release();
                        }
                        worker.stats.record_failure();
                        Some(worker.checkpoint())
                    }
                    None => None,
                },
                None => None,
            };
            (task.checkpoint(), worker)
        };

        tracing::info!(task = %task_id, caller = caller.author(), reason, "task failed");
        self.store.persist_task(&task).await;
        if let Some(worker) = worker {
            self.store.persist_worker(&worker).await;
        }
        Ok(())
    }

    /// Put a failed task back into the pending set.
    pub async fn requeue(&self, task_id: &TaskId) -> Result<()> {
        let task_entry = self.store.require_task(task_id).await?;
        let task = {
            let mut task = task_entry.lock().await;
            ensure_status(&task, TaskStatus::Failed, "requeue")?;
            task.requeue();
            task.add_note(SYSTEM_AUTHOR, "requeued");
            self.store.mark_pending(task_id).await;
            task.checkpoint()
        };

        tracing::info!(task = %task_id, "task requeued");
        self.store.persist_task(&task).await;
        Ok(())
    }
}
