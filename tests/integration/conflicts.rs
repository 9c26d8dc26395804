//! Overlap detection and conflict resolution tests.

use tasklane::core::{DependencyEdge, Priority, TaskStatus};
use tasklane::orchestration::{AppliedChange, OverlapKind, ResolutionKind};
use tasklane::NewTask;

use crate::fixtures::Harness;

const LOGIN_AUDIT: &str = "security audit login session token handler";
const PAYMENT_AUDIT: &str = "security audit payment gateway refund webhook";

/// Test: Scenario A
/// Given two security tasks whose names share two keywords
/// When conflicts are analyzed and resolved
/// Then one overlap and one capability conflict come back, resolved into a
/// priority-ordered dependency plus a capability sequence
#[tokio::test]
async fn test_scenario_overlapping_security_tasks() {
    let harness = Harness::new();
    let t1 = harness.task(LOGIN_AUDIT, Priority::High, &["security"]).await;
    let t2 = harness.task(PAYMENT_AUDIT, Priority::Normal, &["security"]).await;

    let overlaps = harness.orch.analyze_conflicts().await;
    assert_eq!(overlaps.len(), 2);
    let work: Vec<_> = overlaps
        .iter()
        .filter(|r| r.kind == OverlapKind::OverlappingWork)
        .collect();
    assert_eq!(work.len(), 1);
    assert!(work[0].score > 0.3);
    assert!(overlaps
        .iter()
        .any(|r| r.kind == OverlapKind::CapabilityConflict));

    let resolutions = harness.orch.resolve_conflicts(&overlaps).await;
    let kinds: Vec<ResolutionKind> = resolutions.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ResolutionKind::CreateDependency,
            ResolutionKind::SequenceCapabilityTasks
        ]
    );
    let expected = DependencyEdge::new(t2, t1);
    assert_eq!(resolutions[0].edges, vec![expected.clone()]);
    assert_eq!(resolutions[1].participants, vec![t1, t2]);

    let changes = harness.orch.apply_resolutions(&resolutions).await;
    assert_eq!(
        changes,
        vec![
            AppliedChange::EdgeAdded {
                kind: ResolutionKind::CreateDependency,
                edge: expected.clone(),
            },
            AppliedChange::EdgeExisting {
                kind: ResolutionKind::SequenceCapabilityTasks,
                edge: expected,
            },
        ]
    );

    let t2_task = harness.orch.task(&t2).await.unwrap();
    assert!(t2_task.dependencies.contains(&t1));
    assert_eq!(harness.orch.get_system_status().await.dependency_edges, 1);
}

/// Test: Idempotence
/// Given an applied analysis pass
/// When the same pass runs again
/// Then no edge is added twice
#[tokio::test]
async fn test_resolution_is_idempotent() {
    let harness = Harness::new();
    harness.task(LOGIN_AUDIT, Priority::High, &["security"]).await;
    harness.task(PAYMENT_AUDIT, Priority::Normal, &["security"]).await;
    harness.task("security review of oauth scopes", Priority::Low, &["security"]).await;

    let first = harness.orch.run_conflict_analysis().await;
    let added = first.iter().filter(|c| c.is_mutation()).count();
    assert!(added > 0);
    let edges = harness.orch.get_system_status().await.dependency_edges;

    let overlaps = harness.orch.analyze_conflicts().await;
    let resolutions = harness.orch.resolve_conflicts(&overlaps).await;
    let again = harness.orch.resolve_conflicts(&overlaps).await;
    assert_eq!(resolutions, again);

    let second = harness.orch.apply_resolutions(&resolutions).await;
    assert!(second.iter().all(|c| !c.is_mutation()));
    assert_eq!(harness.orch.get_system_status().await.dependency_edges, edges);
}

/// Test: Cycle rejection
/// Given a high-priority task that already waits on a lower-priority one
/// When resolution wants the opposite order
/// Then those resolutions are rejected and the graph is unchanged
#[tokio::test]
async fn test_cycle_rejected_per_resolution() {
    let harness = Harness::new();
    let payment = harness.task(PAYMENT_AUDIT, Priority::Normal, &["security"]).await;
    let login = harness
        .add(
            NewTask::new(LOGIN_AUDIT, ["security"])
                .priority(Priority::High)
                .depends_on(payment),
        )
        .await;
    let unrelated_a = harness.task("tune cache eviction", Priority::Normal, &["perf"]).await;
    let unrelated_b = harness.task("profile cache hits", Priority::Low, &["perf"]).await;

    let changes = harness.orch.run_conflict_analysis().await;

    let rejected = changes
        .iter()
        .filter(|c| matches!(c, AppliedChange::Rejected { .. }))
        .count();
    assert_eq!(rejected, 2, "dependency and security sequence both close a cycle");
    // The perf pair is independent and still applies.
    assert!(changes.contains(&AppliedChange::EdgeAdded {
        kind: ResolutionKind::CreateDependency,
        edge: DependencyEdge::new(unrelated_b, unrelated_a),
    }));

    let payment_task = harness.orch.task(&payment).await.unwrap();
    assert!(payment_task.dependencies.is_empty());
    let login_task = harness.orch.task(&login).await.unwrap();
    assert_eq!(login_task.dependencies.len(), 1);
}

/// Test: Duplicates are surfaced, never merged
/// Given two tasks with the same signature
/// When conflicts are analyzed and applied
/// Then a merge advisory is reported and both tasks stay pending
#[tokio::test]
async fn test_identical_tasks_get_merge_advisory() {
    let harness = Harness::new();
    let a = harness.task("Rotate API keys", Priority::Normal, &["ops"]).await;
    let b = harness.task("rotate  api KEYS", Priority::Normal, &["ops"]).await;

    let overlaps = harness.orch.analyze_conflicts().await;
    let duplicate = overlaps
        .iter()
        .find(|r| r.kind == OverlapKind::OverlappingWork)
        .unwrap();
    assert_eq!(duplicate.reason, "identical signature");
    assert_eq!(duplicate.score, 1.0);

    let resolutions = harness.orch.resolve_conflicts(&overlaps).await;
    let changes = harness.orch.apply_resolutions(&resolutions).await;
    assert!(changes.iter().any(|c| matches!(
        c,
        AppliedChange::Advisory {
            kind: ResolutionKind::MergeTasks,
            ..
        }
    )));

    for id in [a, b] {
        assert_eq!(harness.orch.task(&id).await.unwrap().status, TaskStatus::Pending);
    }
}

/// Test: Weak overlap
/// Given tasks with unrelated names and partly shared capabilities
/// When resolved
/// Then a timing advisory is produced without touching the graph
#[tokio::test]
async fn test_weak_overlap_coordinates_timing() {
    let harness = Harness::new();
    harness.task("compile kernels", Priority::Normal, &["cuda", "cpp"]).await;
    harness.task("vectorize loops", Priority::Normal, &["cuda", "cpp", "simd"]).await;

    let overlaps = harness.orch.analyze_conflicts().await;
    let resolutions = harness.orch.resolve_conflicts(&overlaps).await;
    assert!(resolutions
        .iter()
        .any(|r| r.kind == ResolutionKind::CoordinateTiming && r.edges.is_empty()));
    assert!(!resolutions
        .iter()
        .any(|r| r.kind == ResolutionKind::CreateDependency));
}
