//! Eligibility checks: can this worker take this task right now?
//!
//! Matching is ANY-match on capabilities. A worker qualifies when it offers
//! at least one of the capabilities a task requires, which keeps as many
//! workers busy as possible at the cost of precision.

use std::collections::BTreeSet;

use crate::core::{Task, TaskStatus};
use crate::store::TaskStore;

/// True if the two capability sets share at least one entry.
pub fn can_handle(worker_caps: &BTreeSet<String>, required: &BTreeSet<String>) -> bool {
    !worker_caps.is_disjoint(required)
}

/// True if every prerequisite of `task` is `Completed`. Unknown
/// prerequisites count as unsatisfied.
///
/// Locks each prerequisite in turn, so callers may hold the dependent
/// task's lock (the graph is acyclic, so no prerequisite can be waiting on
/// it).
pub async fn dependencies_satisfied(task: &Task, store: &TaskStore) -> bool {
    for dep in &task.dependencies {
        let Some(entry) = store.task(dep).await else {
            return false;
        };
        if entry.lock().await.status != TaskStatus::Completed {
            return false;
        }
    }
    true
}
