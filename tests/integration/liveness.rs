//! Liveness monitor tests.
//!
//! These tests verify that silent workers are taken offline and their work
//! failed, both by an explicit sweep and by the background loop.

use std::time::Duration;

use chrono::Utc;

use tasklane::config::Config;
use tasklane::core::{Priority, TaskStatus, WorkerStatus};
use tasklane::orchestration::TIMEOUT_REASON;

use crate::fixtures::Harness;

fn fast_config() -> Config {
    Config {
        heartbeat_timeout_secs: 1,
        monitor_interval_secs: 1,
        ..Default::default()
    }
}

/// Test: Background reclaim
/// Given a worker that claims a task and then goes silent
/// When the liveness loop runs with a 1s timeout and 1s interval
/// Then the task is failed and the worker is offline within a few intervals
#[tokio::test]
async fn test_monitor_reclaims_silent_worker() {
    let harness = Harness::with_config(fast_config());
    let worker = harness.worker("w1", &["rust"]).await;
    let task_id = harness.task("long build", Priority::Normal, &["rust"]).await;
    harness.orch.claim(&worker, &task_id).await.unwrap();

    let handle = harness.orch.spawn_liveness_monitor();

    let mut reclaimed = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if harness.orch.task(&task_id).await.unwrap().status == TaskStatus::Failed {
            reclaimed = true;
            break;
        }
    }
    handle.stop().await;
    assert!(reclaimed, "task should be reclaimed within the timeout window");

    let task = harness.orch.task(&task_id).await.unwrap();
    assert_eq!(task.failure_reason.as_deref(), Some(TIMEOUT_REASON));
    assert!(task.assigned_worker.is_none());
    let worker = harness.orch.worker(&worker).await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Offline);
    assert_eq!(worker.stats.failed, 1);
}

/// Test: Heartbeats keep a worker alive
/// Given a worker sending heartbeats faster than the timeout
/// When a sweep runs
/// Then nothing is reclaimed
#[tokio::test]
async fn test_heartbeat_prevents_reclaim() {
    let harness = Harness::with_config(Config {
        heartbeat_timeout_secs: 60,
        ..Default::default()
    });
    let worker = harness.worker("w1", &["rust"]).await;
    let task_id = harness.task("steady", Priority::Normal, &["rust"]).await;
    harness.orch.claim(&worker, &task_id).await.unwrap();
    harness.orch.heartbeat(&worker).await.unwrap();

    let report = harness.orch.sweep().await;
    assert!(report.offline.is_empty());
    assert_eq!(
        harness.orch.task(&task_id).await.unwrap().status,
        TaskStatus::InProgress
    );
}

/// Test: Late reports after a reclaim
/// Given a worker whose task was reclaimed
/// When it comes back and reports progress
/// Then the report is rejected but its heartbeat revives it
#[tokio::test]
async fn test_reclaimed_worker_cannot_report() {
    let harness = Harness::with_config(fast_config());
    let worker = harness.worker("w1", &["rust"]).await;
    let task_id = harness.task("flaky network", Priority::Normal, &["rust"]).await;
    harness.orch.claim(&worker, &task_id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let report = harness.orch.sweep().await;
    assert_eq!(report.reclaimed, vec![task_id]);

    let err = harness
        .orch
        .update_progress(&worker, &task_id, 80, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), tasklane::ErrorKind::StateConflict);

    let revived = harness.orch.worker(&worker).await.unwrap();
    assert_eq!(revived.status, WorkerStatus::Idle);
    assert!(Utc::now() - revived.last_heartbeat < chrono::Duration::seconds(1));
}
