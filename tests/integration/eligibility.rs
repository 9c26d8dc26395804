//! Capability and dependency gating tests.

use tasklane::core::{Priority, TaskId};
use tasklane::{Error, NewTask};

use crate::fixtures::Harness;

/// Test: Scenario B - capability gate
/// Given a python worker and a task requiring only security
/// When the worker polls and tries to claim
/// Then the task is not offered and the claim is rejected
#[tokio::test]
async fn test_worker_without_capability_is_excluded() {
    let harness = Harness::new();
    let python = harness.worker("py", &["python_development"]).await;
    let auditor = harness.worker("sec", &["security", "rust"]).await;
    let task_id = harness.task("Audit session tokens", Priority::High, &["security"]).await;

    assert!(harness.orch.get_available_tasks(&python).await.unwrap().is_empty());
    let err = harness.orch.claim(&python, &task_id).await.unwrap_err();
    assert!(matches!(err, Error::CapabilityMismatch { .. }));

    let offered: Vec<TaskId> = harness
        .orch
        .get_available_tasks(&auditor)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(offered, vec![task_id]);
}

/// Test: Scenario C - dependency gate
/// Given T3 depending on a pending T4
/// When any worker polls
/// Then T3 is hidden until T4 is completed
#[tokio::test]
async fn test_dependent_task_hidden_until_prerequisite_completes() {
    let harness = Harness::new();
    let w1 = harness.worker("w1", &["rust"]).await;
    let w2 = harness.worker("w2", &["rust", "docs"]).await;

    let t4 = harness.task("Build schema", Priority::Low, &["rust"]).await;
    let t3 = harness
        .add(NewTask::new("Build API", ["rust"]).priority(Priority::Critical).depends_on(t4))
        .await;

    for worker in [&w1, &w2] {
        let offered: Vec<TaskId> = harness
            .orch
            .get_available_tasks(worker)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(offered, vec![t4], "only the prerequisite is claimable");
    }
    let err = harness.orch.claim(&w2, &t3).await.unwrap_err();
    assert!(matches!(err, Error::DependenciesUnsatisfied { .. }));

    harness.orch.claim(&w1, &t4).await.unwrap();
    assert!(harness.orch.get_available_tasks(&w2).await.unwrap().is_empty());
    harness.orch.update_progress(&w1, &t4, 100, None).await.unwrap();

    let offered = harness.orch.get_available_tasks(&w2).await.unwrap();
    assert_eq!(offered.len(), 1);
    assert_eq!(offered[0].id, t3);
    harness.orch.claim(&w2, &t3).await.unwrap();
}

/// Test: Referential integrity
/// Given an unknown dependency id
/// When a task is added with it
/// Then the add fails as a validation error and nothing is stored
#[tokio::test]
async fn test_unknown_dependency_rejected() {
    let harness = Harness::new();
    let err = harness
        .orch
        .add_task(NewTask::new("orphan", ["rust"]).depends_on(TaskId::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), tasklane::ErrorKind::Validation);
    assert_eq!(harness.orch.get_system_status().await.tasks.total, 0);
}

/// Test: Live task limit
/// Given max_tasks = 2
/// When a third live task is added
/// Then it is rejected until one of the first two finishes
#[tokio::test]
async fn test_max_live_tasks() {
    let harness = Harness::with_config(tasklane::config::Config {
        max_tasks: 2,
        ..Default::default()
    });
    let worker = harness.worker("w1", &["rust"]).await;
    let first = harness.task("one", Priority::Normal, &["rust"]).await;
    harness.task("two", Priority::Normal, &["rust"]).await;

    let err = harness
        .orch
        .add_task(NewTask::new("three", ["rust"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    harness.orch.claim(&worker, &first).await.unwrap();
    harness.orch.complete(&worker, &first, None).await.unwrap();
    harness.task("three", Priority::Normal, &["rust"]).await;
}
