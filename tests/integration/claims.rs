//! Claim lifecycle tests.
//!
//! These tests verify exclusive claiming under concurrency and the
//! progress/complete/fail transitions as seen through the public API.

use std::sync::Arc;

use futures::future::join_all;

use tasklane::core::{Priority, TaskStatus, WorkerId, WorkerStatus};
use tasklane::{Error, ErrorKind, NewTask};

use crate::fixtures::{caps, Harness};

/// Test: Mutual exclusion
/// Given 16 capable workers and one pending task
/// When they all claim it at once on a multi-threaded runtime
/// Then exactly one claim succeeds and only the winner holds the task
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let harness = Harness::new();
    let task_id = harness.task("hot task", Priority::High, &["rust"]).await;

    let mut workers = Vec::new();
    for i in 0..16 {
        workers.push(harness.worker(&format!("w{}", i), &["rust"]).await);
    }

    let handles = workers.iter().cloned().map(|worker_id| {
        let orch = Arc::clone(&harness.orch);
        tokio::spawn(async move {
            let result = orch.claim(&worker_id, &task_id).await;
            (worker_id, result)
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("claim task panicked"))
        .collect();

    let winners: Vec<&WorkerId> = results
        .iter()
        .filter(|(_, r)| r.is_ok())
        .map(|(w, _)| w)
        .collect();
    assert_eq!(winners.len(), 1, "exactly one claim should win");
    let winner = winners[0].clone();

    for (_, result) in results.iter().filter(|(_, r)| r.is_err()) {
        let err = result.as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    let task = harness.orch.task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.assigned_worker.as_ref(), Some(&winner));

    for worker_id in &workers {
        let worker = harness.orch.worker(worker_id).await.unwrap();
        if *worker_id == winner {
            assert_eq!(worker.current_task, Some(task_id));
            assert_eq!(worker.status, WorkerStatus::Busy);
        } else {
            assert!(worker.current_task.is_none());
            assert_eq!(worker.status, WorkerStatus::Idle);
        }
    }
}

/// Test: Concurrent claims across many tasks
/// Given 8 workers and 8 tasks
/// When every worker races for every task in turn
/// Then each task ends up with exactly one holder and no worker holds two
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claim_storm_keeps_assignments_consistent() {
    let harness = Harness::new();
    let mut tasks = Vec::new();
    for i in 0..8 {
        tasks.push(harness.task(&format!("job {}", i), Priority::Normal, &["rust"]).await);
    }
    let mut workers = Vec::new();
    for i in 0..8 {
        workers.push(harness.worker(&format!("w{}", i), &["rust"]).await);
    }

    let mut handles = Vec::new();
    for worker_id in &workers {
        for task_id in &tasks {
            let orch = Arc::clone(&harness.orch);
            let (worker_id, task_id) = (worker_id.clone(), *task_id);
            handles.push(tokio::spawn(async move {
                let _ = orch.claim(&worker_id, &task_id).await;
            }));
        }
    }
    for handle in join_all(handles).await {
        handle.expect("claim task panicked");
    }

    let status = harness.orch.get_system_status().await;
    let mut holders = Vec::new();
    for summary in &status.task_summaries {
        if let Some(worker_id) = &summary.assigned_worker {
            assert_eq!(summary.status, TaskStatus::InProgress);
            let worker = harness.orch.worker(worker_id).await.unwrap();
            assert_eq!(worker.current_task, Some(summary.id));
            holders.push(worker_id.clone());
        }
    }
    let distinct: std::collections::BTreeSet<_> = holders.iter().cloned().collect();
    assert_eq!(distinct.len(), holders.len(), "no worker may hold two tasks");
    assert_eq!(status.tasks.in_progress, holders.len());
    assert_eq!(status.workers.busy, holders.len());
}

/// Test: Round trip
/// Given a task added with explicit fields
/// When it is looked up, claimed and completed
/// Then the stored fields match and it ends COMPLETED at 100
#[tokio::test]
async fn test_add_lookup_complete_round_trip() {
    let harness = Harness::new();
    let worker = harness.worker("w1", &["rust", "docs"]).await;
    let task_id = harness
        .add(
            NewTask::new("Write parser docs", ["docs"])
                .description("Document the grammar")
                .priority(Priority::Low)
                .estimate(std::time::Duration::from_secs(900)),
        )
        .await;

    let task = harness.orch.task(&task_id).await.unwrap();
    assert_eq!(task.name, "Write parser docs");
    assert_eq!(task.description, "Document the grammar");
    assert_eq!(task.priority, Priority::Low);
    assert_eq!(task.required_capabilities, caps(&["docs"]));
    assert_eq!(task.estimated_duration.as_secs(), 900);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.progress, 0);

    harness.orch.claim(&worker, &task_id).await.unwrap();
    harness
        .orch
        .complete(&worker, &task_id, Some("all sections written"))
        .await
        .unwrap();

    let task = harness.orch.task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert!(task.assigned_worker.is_none());
    assert_eq!(task.implementation_notes.len(), 1);

    let worker = harness.orch.worker(&worker).await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert_eq!(worker.stats.completed, 1);
    assert_eq!(worker.stats.success_rate, 1.0);
}

/// Test: Progress boundaries
/// Given a claimed task
/// When progress is reported below 0 and then above 100
/// Then it clamps to 0 and then completes at 100
#[tokio::test]
async fn test_progress_clamping() {
    let harness = Harness::new();
    let worker = harness.worker("w1", &["rust"]).await;
    let task_id = harness.task("clamp", Priority::Normal, &["rust"]).await;
    harness.orch.claim(&worker, &task_id).await.unwrap();

    let status = harness
        .orch
        .update_progress(&worker, &task_id, -5, None)
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::InProgress);
    assert_eq!(harness.orch.task(&task_id).await.unwrap().progress, 0);

    let status = harness
        .orch
        .update_progress(&worker, &task_id, 140, Some("overshoot"))
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::Completed);
    let task = harness.orch.task(&task_id).await.unwrap();
    assert_eq!(task.progress, 100);
    assert!(task.completed_at.is_some());

    let err = harness
        .orch
        .update_progress(&worker, &task_id, 50, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

/// Test: Failure and caller-driven retry
/// Given a worker that fails its task
/// When the task is requeued
/// Then another worker can claim it and the first worker's stats show the failure
#[tokio::test]
async fn test_fail_requeue_reclaim() {
    let harness = Harness::new();
    let first = harness.worker("w1", &["rust"]).await;
    let second = harness.worker("w2", &["rust"]).await;
    let task_id = harness.task("flaky", Priority::Normal, &["rust"]).await;

    harness.orch.claim(&first, &task_id).await.unwrap();
    let err = harness
        .orch
        .fail(&second, &task_id, "not mine")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotAssigned { .. }));

    harness.orch.fail(&first, &task_id, "segfault").await.unwrap();
    assert!(harness.orch.get_available_tasks(&second).await.unwrap().is_empty());

    harness.orch.requeue(&task_id).await.unwrap();
    harness.orch.claim(&second, &task_id).await.unwrap();

    let first = harness.orch.worker(&first).await.unwrap();
    assert_eq!(first.stats.failed, 1);
    assert_eq!(first.stats.success_rate, 0.0);
}
