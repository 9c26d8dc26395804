//! Authoritative in-memory state.
//!
//! Tasks and workers each sit behind their own mutex so claims on
//! different tasks never contend. The maps themselves are only locked long
//! enough to clone an entry handle.
//!
//! Lock order, outermost first: dependency graph, task, prerequisite tasks
//! (status reads only), worker. No code path takes the graph while holding
//! a task, or a task while holding a worker.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::core::task::SYSTEM_AUTHOR;
use crate::core::{
    DependencyEdge, DependencyGraph, DependencyType, Task, TaskId, TaskStatus, Worker, WorkerId,
    WorkerStatus,
};
use crate::persistence::PersistenceStore;
use crate::util::blocking_with_retry;
use crate::{Error, Result};

/// Reason recorded on in-progress tasks whose holder could not be matched
/// up again on restore.
pub const ORPHANED_REASON: &str = "assignment lost on restore";

pub type SharedTask = Arc<Mutex<Task>>;
pub type SharedWorker = Arc<Mutex<Worker>>;

pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, SharedTask>>,
    workers: RwLock<HashMap<WorkerId, SharedWorker>>,
    /// Ids of tasks currently in `Pending`.
    pending: RwLock<HashSet<TaskId>>,
    graph: RwLock<DependencyGraph>,
    mirror: Arc<dyn PersistenceStore>,
    persist_timeout: Duration,
    persist_retries: u32,
    persistence_failures: AtomicU64,
}

impl TaskStore {
    pub fn new(
        mirror: Arc<dyn PersistenceStore>,
        persist_timeout: Duration,
        persist_retries: u32,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            workers: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashSet::new()),
            graph: RwLock::new(DependencyGraph::new()),
            mirror,
            persist_timeout,
            persist_retries,
            persistence_failures: AtomicU64::new(0),
        }
    }

    /// Insert a new task along with its declared dependency edges.
    ///
    /// # Errors
    /// - `TaskNotFound` if a declared dependency is unknown
    /// - `Validation` if the live-task limit is reached
    pub async fn insert_task(&self, mut task: Task, max_live: usize) -> Result<TaskId> {
        let id = task.id;
        {
            // Held across count and insert so concurrent adds cannot both
            // pass the limit.
            let mut graph = self.graph.write().await;

            if let Some(missing) = task.dependencies.iter().find(|d| !graph.contains_task(d)) {
                return Err(Error::TaskNotFound(*missing));
            }

            let live = self.count_live().await;
            if live >= max_live {
                return Err(Error::Validation(format!(
                    "task limit reached ({} live, max {})",
                    live, max_live
                )));
            }

            let edges: Vec<(DependencyEdge, DependencyType)> = task
                .dependencies
                .iter()
                .map(|dep| (DependencyEdge::new(id, *dep), DependencyType::Declared))
                .collect();
            let mut trial = graph.clone();
            trial.add_task(id);
            trial.add_dependencies(&edges)?;
            *graph = trial;

            task.status = TaskStatus::Pending;
            self.tasks
                .write()
                .await
                .insert(id, Arc::new(Mutex::new(task.clone())));
            self.pending.write().await.insert(id);
        }

        self.persist_task(&task).await;
        Ok(id)
    }

    async fn count_live(&self) -> usize {
        let mut live = 0;
        for task in self.tasks().await {
            if task.lock().await.is_live() {
                live += 1;
            }
        }
        live
    }

    /// Insert or replace a worker entry. Returns `true` if the id was new.
    pub async fn upsert_worker(&self, worker: Worker) -> bool {
        let (entry, is_new) = {
            let mut workers = self.workers.write().await;
            match workers.get(&worker.id) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let entry = Arc::new(Mutex::new(worker.clone()));
                    workers.insert(worker.id.clone(), Arc::clone(&entry));
                    (entry, true)
                }
            }
        };

        let current = {
            let mut current = entry.lock().await;
            if !is_new {
                current.name = worker.name;
                current.capabilities = worker.capabilities;
                current.touch();
            }
            current.checkpoint()
        };
        self.persist_worker(&current).await;
        is_new
    }

    pub async fn task(&self, id: &TaskId) -> Option<SharedTask> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn worker(&self, id: &WorkerId) -> Option<SharedWorker> {
        self.workers.read().await.get(id).cloned()
    }

    pub async fn require_task(&self, id: &TaskId) -> Result<SharedTask> {
        self.task(id).await.ok_or(Error::TaskNotFound(*id))
    }

    pub async fn require_worker(&self, id: &WorkerId) -> Result<SharedWorker> {
        self.worker(id).await.ok_or_else(|| Error::WorkerNotFound(id.clone()))
    }

    pub async fn tasks(&self) -> Vec<SharedTask> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn workers(&self) -> Vec<SharedWorker> {
        self.workers.read().await.values().cloned().collect()
    }

    /// Point-in-time copies, each entry locked only while it is cloned.
    pub async fn snapshot_tasks(&self) -> Vec<Task> {
        let mut out = Vec::new();
        for task in self.tasks().await {
            out.push(task.lock().await.clone());
        }
        out
    }

    pub async fn snapshot_workers(&self) -> Vec<Worker> {
        let mut out = Vec::new();
        for worker in self.workers().await {
            out.push(worker.lock().await.clone());
        }
        out
    }

    pub async fn pending_ids(&self) -> Vec<TaskId> {
        self.pending.read().await.iter().copied().collect()
    }

    /// Drop a task from the pending set. Callers hold the task's lock.
    pub async fn mark_claimed(&self, id: &TaskId) {
        self.pending.write().await.remove(id);
    }

    /// Return a task to the pending set. Callers hold the task's lock.
    pub async fn mark_pending(&self, id: &TaskId) {
        self.pending.write().await.insert(*id);
    }

    /// Add dependency edges as one unit and mirror them onto the dependent
    /// tasks. Returns one flag per edge, `false` for already present edges.
    pub async fn add_dependencies(
        &self,
        edges: &[(DependencyEdge, DependencyType)],
    ) -> Result<Vec<bool>> {
        let mut changed = Vec::new();
        let added = {
            let mut graph = self.graph.write().await;
            let added = graph.add_dependencies(edges)?;
            for ((edge, dep_type), was_added) in edges.iter().zip(&added) {
                if !was_added {
                    continue;
                }
                let task = self.require_task(&edge.dependent).await?;
                let mut task = task.lock().await;
                task.add_dependency(edge.prerequisite, dep_type);
                changed.push(task.checkpoint());
            }
            added
        };
        for task in &changed {
            self.persist_task(task).await;
        }
        Ok(added)
    }

    /// Edge counts keyed by dependency kind.
    pub async fn edge_counts(&self) -> BTreeMap<String, usize> {
        self.graph.read().await.edge_counts()
    }

    /// Replace all state with previously persisted tasks and workers.
    ///
    /// Edges that point at unknown tasks or would close a cycle are dropped
    /// with a warning. Assignments are reconciled (see
    /// [`reconcile_assignments`]) and every entry that changed is written
    /// back to the mirror.
    pub async fn restore(&self, mut tasks: Vec<Task>, workers: Vec<Worker>) {
        let mut workers: HashMap<WorkerId, Worker> =
            workers.into_iter().map(|w| (w.id.clone(), w)).collect();
        let (repaired_tasks, repaired_workers) = reconcile_assignments(&mut tasks, &mut workers);

        let mut graph = DependencyGraph::new();
        for task in &tasks {
            graph.add_task(task.id);
        }

        let mut task_map = HashMap::new();
        let mut pending = HashSet::new();
        for mut task in tasks {
            let declared = std::mem::take(&mut task.dependencies);
            let origins = std::mem::take(&mut task.dependency_origins);
            for dep in declared {
                let edge = DependencyEdge::new(task.id, dep);
                let origin = origins.get(&dep).cloned().unwrap_or_default();
                match graph.add_dependency(&edge, origin.clone()) {
                    Ok(_) => task.add_dependency(dep, &origin),
                    Err(e) => {
                        tracing::warn!(task = %task.id, error = %e, "dropping restored dependency")
                    }
                }
            }
            if task.status == TaskStatus::Pending {
                pending.insert(task.id);
            }
            task_map.insert(task.id, Arc::new(Mutex::new(task)));
        }

        let worker_map = workers
            .into_iter()
            .map(|(id, w)| (id, Arc::new(Mutex::new(w))))
            .collect();

        {
            let mut graph_guard = self.graph.write().await;
            *graph_guard = graph;
            tracing::debug!(tasks = task_map.len(), "TaskStore::restore");
            *self.tasks.write().await = task_map;
            *self.workers.write().await = worker_map;
            *self.pending.write().await = pending;
        }

        for id in &repaired_tasks {
            if let Some(entry) = self.task(id).await {
                let snapshot = entry.lock().await.checkpoint();
                self.persist_task(&snapshot).await;
            }
        }
        for id in &repaired_workers {
            if let Some(entry) = self.worker(id).await {
                let snapshot = entry.lock().await.checkpoint();
                self.persist_worker(&snapshot).await;
            }
        }
    }

    pub fn mirror(&self) -> &Arc<dyn PersistenceStore> {
        &self.mirror
    }

    /// Write a task to the durable mirror. Failures are counted and logged,
    /// never returned.
    pub async fn persist_task(&self, task: &Task) {
        let mirror = Arc::clone(&self.mirror);
        let task = task.clone();
        let id = task.id;
        let result = blocking_with_retry(self.persist_timeout, self.persist_retries, move || {
            mirror.save_task(&task)
        })
        .await;
        if let Err(e) = result {
            self.persistence_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(task = %id, error = %e, "failed to persist task");
        }
    }

    pub async fn persist_worker(&self, worker: &Worker) {
        let mirror = Arc::clone(&self.mirror);
        let worker = worker.clone();
        let id = worker.id.clone();
        let result = blocking_with_retry(self.persist_timeout, self.persist_retries, move || {
            mirror.save_worker(&worker)
        })
        .await;
        if let Err(e) = result {
            self.persistence_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(worker = %id, error = %e, "failed to persist worker");
        }
    }

    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }
}

/// Make `Task::assigned_worker` and `Worker::current_task` agree again.
///
/// An in-progress task keeps its worker when that worker's record points at
/// it, or points at nothing another in-progress task kept first (earliest
/// start wins). Any other in-progress task is failed with
/// [`ORPHANED_REASON`]. A worker whose record names a task it no longer
/// holds is released. Returns the ids of the tasks and workers changed.
fn reconcile_assignments(
    tasks: &mut [Task],
    workers: &mut HashMap<WorkerId, Worker>,
) -> (Vec<TaskId>, Vec<WorkerId>) {
    let mut in_progress: Vec<usize> = (0..tasks.len())
        .filter(|&i| tasks[i].status == TaskStatus::InProgress)
        .collect();
    in_progress.sort_by_key(|&i| (tasks[i].started_at, tasks[i].id));

    let mut holders: HashMap<WorkerId, TaskId> = HashMap::new();
    for &i in &in_progress {
        let task = &tasks[i];
        if let Some(holder) = &task.assigned_worker {
            let points_here = workers
                .get(holder)
                .is_some_and(|w| w.current_task == Some(task.id));
            if points_here {
                holders.insert(holder.clone(), task.id);
            }
        }
    }

    let mut repaired_tasks = Vec::new();
    for &i in &in_progress {
        let task = &mut tasks[i];
        let kept = match &task.assigned_worker {
            Some(holder) if holders.get(holder) == Some(&task.id) => true,
            Some(holder) if workers.contains_key(holder) && !holders.contains_key(holder) => {
                holders.insert(holder.clone(), task.id);
                true
            }
            _ => false,
        };
        if !kept {
            tracing::warn!(task = %task.id, worker = ?task.assigned_worker, "failing orphaned task");
            task.add_note(SYSTEM_AUTHOR, &format!("failed: {}", ORPHANED_REASON));
            task.fail(ORPHANED_REASON);
            repaired_tasks.push(task.id);
        }
    }

    let mut repaired_workers = Vec::new();
    for worker in workers.values_mut() {
        let held = holders.get(&worker.id).copied();
        if worker.current_task == held {
            continue;
        }
        tracing::warn!(worker = %worker.id, from = ?worker.current_task, to = ?held, "reconciling worker assignment");
        worker.current_task = held;
        if worker.status != WorkerStatus::Offline {
            worker.status = if held.is_some() {
                WorkerStatus::Busy
            } else {
                WorkerStatus::Idle
            };
        }
        repaired_workers.push(worker.id.clone());
    }

    (repaired_tasks, repaired_workers)
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field(
                "persistence_failures",
                &self.persistence_failures.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}
