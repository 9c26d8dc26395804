//! Public surface of the coordinator.
//!
//! `Orchestrator` wires the store, matcher, claim coordinator, overlap
//! detector, conflict resolver and liveness monitor around one
//! [`OrchestrationContext`]. Worker processes only ever talk to this type.
//!
//! Every state-changing call returns `Result<_>`; a rejected claim or
//! progress update is an `Err` the worker loop can inspect and retry, never
//! a panic.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::context::OrchestrationContext;
use crate::core::{Priority, Task, TaskId, TaskStatus, TaskSummary, Worker, WorkerId};
use crate::orchestration::{
    can_handle, dependencies_satisfied, spawn_periodic, AppliedChange, Caller,
    ClaimCoordinator, ConflictResolver, LivenessMonitor, MonitorHandle, OverlapDetector,
    OverlapRecord, Resolution, SweepReport,
};
use crate::source::{TaskSource, TaskSpec};
use crate::status::SystemStatus;
use crate::util::blocking;
use crate::{Error, Result};

/// Arguments to [`Orchestrator::add_task`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub priority: Priority,
    pub estimated_duration: Duration,
    pub required_capabilities: BTreeSet<String>,
    pub dependencies: BTreeSet<TaskId>,
}

impl NewTask {
    pub fn new<I, S>(name: &str, required_capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            description: String::new(),
            priority: Priority::default(),
            estimated_duration: Duration::ZERO,
            required_capabilities: required_capabilities.into_iter().map(Into::into).collect(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn estimate(mut self, estimated_duration: Duration) -> Self {
        self.estimated_duration = estimated_duration;
        self
    }

    pub fn depends_on(mut self, prerequisite: TaskId) -> Self {
        self.dependencies.insert(prerequisite);
        self
    }
}

/// A spec that `ingest` could not turn into a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedSpec {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub added: Vec<TaskId>,
    pub rejected: Vec<RejectedSpec>,
}

/// Trim capability names; reject an empty set or blank entries.
fn normalize_capabilities(capabilities: &BTreeSet<String>) -> Result<BTreeSet<String>> {
    if capabilities.is_empty() {
        return Err(Error::Validation("capability set is empty".to_string()));
    }
    capabilities
        .iter()
        .map(|cap| {
            let cap = cap.trim();
            if cap.is_empty() {
                Err(Error::Validation("capability names must not be blank".to_string()))
            } else {
                Ok(cap.to_string())
            }
        })
        .collect()
}

pub struct Orchestrator {
    ctx: OrchestrationContext,
    coordinator: Arc<ClaimCoordinator>,
    detector: OverlapDetector,
    resolver: ConflictResolver,
    liveness: Arc<LivenessMonitor>,
}

impl Orchestrator {
    pub fn new(ctx: OrchestrationContext) -> Self {
        let coordinator = Arc::new(ClaimCoordinator::new(Arc::clone(&ctx.store)));
        let liveness = Arc::new(LivenessMonitor::new(
            Arc::clone(&ctx.store),
            Arc::clone(&coordinator),
            ctx.config.heartbeat_timeout(),
            ctx.config.monitor_interval(),
        ));
        Self {
            detector: OverlapDetector::new(ctx.config.overlap.clone()),
            resolver: ConflictResolver::new(ctx.config.overlap.clone()),
            coordinator,
            liveness,
            ctx,
        }
    }

    pub fn context(&self) -> &OrchestrationContext {
        &self.ctx
    }

    /// Reload tasks and workers from the durable mirror, replacing the
    /// in-memory state.
    pub async fn restore(&self) -> Result<()> {
        let mirror = Arc::clone(self.ctx.store.mirror());
        let (tasks, workers) = blocking(move || mirror.load_all()).await?;
        tracing::info!(tasks = tasks.len(), workers = workers.len(), "restoring state");
        self.ctx.store.restore(tasks, workers).await;
        Ok(())
    }

    /// Register a worker, or refresh the name and capabilities of a known
    /// one. Returns `true` if the worker is new.
    pub async fn register_worker(
        &self,
        id: &WorkerId,
        name: &str,
        capabilities: &BTreeSet<String>,
    ) -> Result<bool> {
        let capabilities = normalize_capabilities(capabilities)?;
        let is_new = self
            .ctx
            .store
            .upsert_worker(Worker::new(id.clone(), name, capabilities))
            .await;
        tracing::info!(worker = %id, is_new, "worker registered");
        Ok(is_new)
    }

    /// Add a pending task.
    ///
    /// # Errors
    /// - `Validation` for a blank name, an empty or blank capability set, or
    ///   when `max_tasks` live tasks already exist
    /// - `TaskNotFound` if a dependency is unknown
    pub async fn add_task(&self, new: NewTask) -> Result<TaskId> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("task name must not be empty".to_string()));
        }
        let capabilities = normalize_capabilities(&new.required_capabilities)?;

        let mut task = Task::new(
            name,
            &new.description,
            new.priority,
            capabilities,
            new.estimated_duration,
        );
        task.dependencies = new.dependencies;

        let id = self
            .ctx
            .store
            .insert_task(task, self.ctx.config.max_tasks)
            .await?;
        tracing::info!(task = %id, name, priority = %new.priority, "task added");
        Ok(id)
    }

    /// Pull every batch from `source` and add the tasks.
    ///
    /// Dependencies may name tasks added earlier (in this or an earlier
    /// ingest) or give a task id. Specs that fail validation are reported,
    /// not fatal.
    pub async fn ingest<S>(&self, source: S) -> Result<IngestReport>
    where
        S: TaskSource + 'static,
    {
        let mut by_name: HashMap<String, TaskId> = self
            .ctx
            .store
            .snapshot_tasks()
            .await
            .into_iter()
            .map(|t| (t.name, t.id))
            .collect();

        let mut report = IngestReport::default();
        let mut source = source;
        loop {
            let (returned, batch) = blocking(move || {
                let batch = source.next_batch()?;
                Ok((source, batch))
            })
            .await?;
            source = returned;
            if batch.is_empty() {
                break;
            }

            for spec in batch {
                let name = spec.name.clone();
                match self.add_spec(spec, &by_name).await {
                    Ok(id) => {
                        by_name.insert(name.trim().to_string(), id);
                        report.added.push(id);
                    }
                    Err(e) => {
                        tracing::warn!(name = %name, error = %e, "rejected task spec");
                        report.rejected.push(RejectedSpec {
                            name,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        Ok(report)
    }

    async fn add_spec(&self, spec: TaskSpec, by_name: &HashMap<String, TaskId>) -> Result<TaskId> {
        let mut new = NewTask::new(&spec.name, spec.required_capabilities.clone())
            .description(&spec.description)
            .priority(spec.priority)
            .estimate(spec.estimated_duration()?);
        for dep in &spec.dependencies {
            let id = match dep.parse::<TaskId>() {
                Ok(id) => id,
                Err(_) => *by_name.get(dep.trim()).ok_or_else(|| {
                    Error::Validation(format!("unknown dependency '{}'", dep))
                })?,
            };
            new = new.depends_on(id);
        }
        self.add_task(new).await
    }

    /// Pending tasks this worker could claim right now, in claim order:
    /// priority, then creation time.
    pub async fn get_available_tasks(&self, worker_id: &WorkerId) -> Result<Vec<TaskSummary>> {
        let capabilities = {
            let entry = self.ctx.store.require_worker(worker_id).await?;
            let worker = entry.lock().await;
            worker.capabilities.clone()
        };

        let mut available = Vec::new();
        for id in self.ctx.store.pending_ids().await {
            let Some(entry) = self.ctx.store.task(&id).await else {
                continue;
            };
            let task = entry.lock().await.clone();
            if task.status != TaskStatus::Pending
                || !can_handle(&capabilities, &task.required_capabilities)
            {
                continue;
            }
            if dependencies_satisfied(&task, &self.ctx.store).await {
                available.push(task.summary());
            }
        }
        available.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(available)
    }

    pub async fn claim(&self, worker_id: &WorkerId, task_id: &TaskId) -> Result<()> {
        self.coordinator
            .claim(worker_id, task_id)
            .await
            .inspect_err(|e| tracing::debug!(worker = %worker_id, task = %task_id, error = %e, "claim rejected"))
    }

    /// Report progress; returns the task's status afterwards, `Completed`
    /// once progress reaches 100.
    pub async fn update_progress(
        &self,
        worker_id: &WorkerId,
        task_id: &TaskId,
        progress: i64,
        notes: Option<&str>,
    ) -> Result<TaskStatus> {
        self.coordinator
            .update_progress(worker_id, task_id, progress, notes)
            .await
            .inspect_err(|e| tracing::debug!(worker = %worker_id, task = %task_id, error = %e, "progress rejected"))
    }

    pub async fn complete(
        &self,
        worker_id: &WorkerId,
        task_id: &TaskId,
        notes: Option<&str>,
    ) -> Result<()> {
        self.coordinator
            .complete(worker_id, task_id, notes)
            .await
            .inspect_err(|e| tracing::debug!(worker = %worker_id, task = %task_id, error = %e, "completion rejected"))
    }

    /// Give up on a task held by `worker_id`.
    pub async fn fail(&self, worker_id: &WorkerId, task_id: &TaskId, reason: &str) -> Result<()> {
        self.coordinator
            .fail(&Caller::Worker(worker_id.clone()), task_id, reason)
            .await
    }

    /// Return a failed task to the backlog.
    pub async fn requeue(&self, task_id: &TaskId) -> Result<()> {
        self.coordinator.requeue(task_id).await
    }

    pub async fn heartbeat(&self, worker_id: &WorkerId) -> Result<()> {
        self.coordinator.heartbeat(worker_id).await
    }

    pub async fn analyze_conflicts(&self) -> Vec<OverlapRecord> {
        let tasks = self.ctx.store.snapshot_tasks().await;
        self.detector.detect(&tasks)
    }

    pub async fn resolve_conflicts(&self, overlaps: &[OverlapRecord]) -> Vec<Resolution> {
        let tasks: HashMap<TaskId, Task> = self
            .ctx
            .store
            .snapshot_tasks()
            .await
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        self.resolver.resolve(overlaps, &tasks)
    }

    pub async fn apply_resolutions(&self, resolutions: &[Resolution]) -> Vec<AppliedChange> {
        self.resolver.apply(resolutions, &self.ctx.store).await
    }

    /// Analyze, resolve and apply in one pass.
    pub async fn run_conflict_analysis(&self) -> Vec<AppliedChange> {
        let overlaps = self.analyze_conflicts().await;
        let resolutions = self.resolve_conflicts(&overlaps).await;
        let changes = self.apply_resolutions(&resolutions).await;
        tracing::debug!(
            overlaps = overlaps.len(),
            resolutions = resolutions.len(),
            added = changes.iter().filter(|c| c.is_mutation()).count(),
            "conflict analysis pass"
        );
        changes
    }

    /// One liveness pass at the current time.
    pub async fn sweep(&self) -> SweepReport {
        self.liveness.sweep().await
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let tasks = self.ctx.store.snapshot_tasks().await;
        let workers = self.ctx.store.snapshot_workers().await;
        SystemStatus::build(
            &tasks,
            &workers,
            self.ctx.store.edge_counts().await,
            self.ctx.store.persistence_failures(),
        )
    }

    pub async fn task(&self, id: &TaskId) -> Option<Task> {
        let entry = self.ctx.store.task(id).await?;
        let task = entry.lock().await.clone();
        Some(task)
    }

    pub async fn worker(&self, id: &WorkerId) -> Option<Worker> {
        let entry = self.ctx.store.worker(id).await?;
        let worker = entry.lock().await.clone();
        Some(worker)
    }

    /// Start the background liveness loop on the configured interval.
    pub fn spawn_liveness_monitor(&self) -> MonitorHandle {
        Arc::clone(&self.liveness).spawn()
    }

    /// Start periodic conflict analysis if `analysis_interval_secs` is set.
    pub fn spawn_conflict_analysis(self: &Arc<Self>) -> Option<MonitorHandle> {
        let interval = self.ctx.config.analysis_interval()?;
        let orchestrator = Arc::clone(self);
        Some(spawn_periodic("conflict-analysis", interval, move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator.run_conflict_analysis().await;
            }
        }))
    }
}
