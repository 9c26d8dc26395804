//! Worker liveness monitoring.
//!
//! Workers prove they are alive by calling into the coordinator (claim,
//! progress, complete) or by an explicit heartbeat. A worker whose last
//! heartbeat is older than the timeout is marked offline, and the task it
//! held is failed with reason "worker timeout" so it stops blocking its
//! dependents. Failed tasks are not requeued here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{TaskId, WorkerId, WorkerStatus};
use crate::store::TaskStore;

use super::coordinator::{Caller, ClaimCoordinator};

/// Reason recorded on tasks reclaimed from silent workers.
pub const TIMEOUT_REASON: &str = "worker timeout";

/// Handle to a background loop, used for graceful shutdown.
pub struct MonitorHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop to stop after its current pass.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "background loop ended abnormally");
        }
    }
}

/// Shortest period a background loop ticks at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Run `pass` every `interval` (at least [`MIN_PERIOD`]) until the returned
/// handle is shut down. The first pass runs immediately.
pub fn spawn_periodic<F, Fut>(name: &'static str, interval: Duration, mut pass: F) -> MonitorHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tracing::debug!(loop_name = name, ?interval, "spawning background loop");

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_PERIOD));
        loop {
            tokio::select! {
                _ = cancel_clone.cancelled() => {
                    tracing::debug!(loop_name = name, "background loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    pass().await;
                }
            }
        }
    });

    MonitorHandle { cancel, join }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Workers newly marked offline.
    pub offline: Vec<WorkerId>,
    /// Tasks failed because their worker went silent.
    pub reclaimed: Vec<TaskId>,
    /// Reclaims that could not be completed.
    pub errors: usize,
}

pub struct LivenessMonitor {
    store: Arc<TaskStore>,
    coordinator: Arc<ClaimCoordinator>,
    timeout: Duration,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(
        store: Arc<TaskStore>,
        coordinator: Arc<ClaimCoordinator>,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            coordinator,
            timeout,
            interval,
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Check every worker against `now`.
    ///
    /// The worker's lock is released before its task is failed, keeping the
    /// task-then-worker lock order. A failed reclaim is logged and counted;
    /// it never stops the sweep.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let timeout = chrono::Duration::milliseconds(self.timeout.as_millis() as i64);
        let mut report = SweepReport::default();

        for entry in self.store.workers().await {
            let snapshot = {
                let mut worker = entry.lock().await;
                if worker.status == WorkerStatus::Offline || !worker.is_stale(now, timeout) {
                    continue;
                }
                worker.mark_offline();
                worker.checkpoint()
            };
            let worker_id = snapshot.id.clone();
            let held = snapshot.current_task;

            tracing::warn!(worker = %worker_id, task = ?held, "worker missed heartbeat, marking offline");
            report.offline.push(worker_id.clone());
            self.store.persist_worker(&snapshot).await;

            let Some(task_id) = held else {
                continue;
            };
            match self
                .coordinator
                .fail(&Caller::System, &task_id, TIMEOUT_REASON)
                .await
            {
                Ok(()) => report.reclaimed.push(task_id),
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(worker = %worker_id, task = %task_id, error = %e, "failed to reclaim task");
                }
            }
        }

        tracing::debug!(
            offline = report.offline.len(),
            reclaimed = report.reclaimed.len(),
            errors = report.errors,
            "liveness sweep finished"
        );
        report
    }

    /// Run [`sweep`](Self::sweep) on the configured interval.
    pub fn spawn(self: Arc<Self>) -> MonitorHandle {
        let interval = self.interval;
        spawn_periodic("liveness", interval, move || {
            let monitor = Arc::clone(&self);
            async move {
                monitor.sweep().await;
            }
        })
    }
}
