//! Conflict resolution for overlapping tasks.
//!
//! Overlap records are turned into resolutions by score band:
//!
//! | score              | resolution                  | graph change |
//! |--------------------|-----------------------------|--------------|
//! | > merge            | `MergeTasks`                | none         |
//! | (dependency, merge]| `CreateDependency`          | one edge     |
//! | (overlap, dep]     | `CoordinateTiming`          | none         |
//!
//! Capability conflicts become one `SequenceCapabilityTasks` per contested
//! capability, chaining every task that needs it so only one runs at a time.
//!
//! Merges are advisory only. Live work may already be partially done and
//! the coordinator cannot know how to combine it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::OverlapConfig;
use crate::core::{DependencyEdge, DependencyType, Task, TaskId};
use crate::store::TaskStore;

use super::overlap::{OverlapKind, OverlapRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    MergeTasks,
    CreateDependency,
    SequenceCapabilityTasks,
    CoordinateTiming,
}

impl ResolutionKind {
    /// Advisory resolutions are reported but never touch the graph.
    pub fn is_advisory(&self) -> bool {
        matches!(self, ResolutionKind::MergeTasks | ResolutionKind::CoordinateTiming)
    }
}

impl std::fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionKind::MergeTasks => write!(f, "merge_tasks"),
            ResolutionKind::CreateDependency => write!(f, "create_dependency"),
            ResolutionKind::SequenceCapabilityTasks => write!(f, "sequence_capability_tasks"),
            ResolutionKind::CoordinateTiming => write!(f, "coordinate_timing"),
        }
    }
}

/// A decision derived from one or more overlap records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub kind: ResolutionKind,
    /// Tasks involved. For sequences this is the run order.
    pub participants: Vec<TaskId>,
    /// Edges to add when applied. Empty for advisories.
    pub edges: Vec<DependencyEdge>,
    /// The contested capability, for sequences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    pub reason: String,
}

impl Resolution {
    fn advisory(kind: ResolutionKind, record: &OverlapRecord, reason: String) -> Self {
        Self {
            kind,
            participants: vec![record.task_a, record.task_b],
            edges: Vec::new(),
            capability: None,
            reason,
        }
    }

    /// How applied edges are labelled in the graph.
    pub fn dependency_type(&self) -> DependencyType {
        match &self.capability {
            Some(capability) => DependencyType::CapabilitySequence {
                capability: capability.clone(),
            },
            None => DependencyType::Overlap,
        }
    }
}

/// What applying one resolution did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "change")]
pub enum AppliedChange {
    EdgeAdded {
        kind: ResolutionKind,
        edge: DependencyEdge,
    },
    /// The edge was already in the graph; nothing changed.
    EdgeExisting {
        kind: ResolutionKind,
        edge: DependencyEdge,
    },
    Advisory {
        kind: ResolutionKind,
        participants: Vec<TaskId>,
        reason: String,
    },
    /// The whole resolution was dropped, typically because an edge would
    /// have closed a cycle.
    Rejected {
        kind: ResolutionKind,
        participants: Vec<TaskId>,
        reason: String,
    },
}

impl AppliedChange {
    pub fn is_mutation(&self) -> bool {
        matches!(self, AppliedChange::EdgeAdded { .. })
    }
}

impl std::fmt::Display for AppliedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppliedChange::EdgeAdded { kind, edge } => write!(f, "{}: added {}", kind, edge),
            AppliedChange::EdgeExisting { kind, edge } => {
                write!(f, "{}: {} already present", kind, edge)
            }
            AppliedChange::Advisory { kind, reason, .. } => write!(f, "{}: {}", kind, reason),
            AppliedChange::Rejected { kind, reason, .. } => {
                write!(f, "{}: rejected ({})", kind, reason)
            }
        }
    }
}

/// Run order between two tasks: higher priority first, then the shorter
/// estimate, then id.
fn run_order(a: &Task, b: &Task) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.estimated_duration.cmp(&b.estimated_duration))
        .then(a.id.cmp(&b.id))
}

#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    config: OverlapConfig,
}

impl ConflictResolver {
    pub fn new(config: OverlapConfig) -> Self {
        Self { config }
    }

    /// Derive resolutions from `overlaps`.
    ///
    /// `tasks` must hold the tasks the records mention; records naming an
    /// unknown task are skipped. The output depends only on the inputs, so
    /// resolving the same records twice yields the same resolutions.
    pub fn resolve(
        &self,
        overlaps: &[OverlapRecord],
        tasks: &HashMap<TaskId, Task>,
    ) -> Vec<Resolution> {
        let mut resolutions = Vec::new();
        let mut contested: BTreeMap<String, BTreeSet<TaskId>> = BTreeMap::new();

        for record in overlaps {
            let (Some(a), Some(b)) = (tasks.get(&record.task_a), tasks.get(&record.task_b)) else {
                tracing::debug!(
                    task_a = %record.task_a,
                    task_b = %record.task_b,
                    "skipping overlap for unknown task"
                );
                continue;
            };

            match record.kind {
                OverlapKind::OverlappingWork => {
                    if let Some(resolution) = self.resolve_overlap(record, a, b) {
                        resolutions.push(resolution);
                    }
                }
                OverlapKind::CapabilityConflict => {
                    for capability in &record.shared_capabilities {
                        let members = contested.entry(capability.clone()).or_default();
                        members.insert(a.id);
                        members.insert(b.id);
                    }
                }
            }
        }

        for (capability, members) in contested {
            resolutions.push(sequence(capability, &members, tasks));
        }

        resolutions
    }

    fn resolve_overlap(&self, record: &OverlapRecord, a: &Task, b: &Task) -> Option<Resolution> {
        let score = record.score;
        if score > self.config.merge_threshold {
            let reason = format!(
                "score {:.2} ({}): consider merging '{}' and '{}'",
                score, record.reason, a.name, b.name
            );
            return Some(Resolution::advisory(ResolutionKind::MergeTasks, record, reason));
        }
        if score > self.config.dependency_threshold {
            let (first, then) = match run_order(a, b) {
                Ordering::Greater => (b, a),
                _ => (a, b),
            };
            return Some(Resolution {
                kind: ResolutionKind::CreateDependency,
                participants: vec![first.id, then.id],
                edges: vec![DependencyEdge::new(then.id, first.id)],
                capability: None,
                reason: format!(
                    "score {:.2}: '{}' waits for '{}'",
                    score, then.name, first.name
                ),
            });
        }
        if score > self.config.overlap_threshold {
            let reason = format!(
                "score {:.2}: coordinate timing of '{}' and '{}'",
                score, a.name, b.name
            );
            return Some(Resolution::advisory(
                ResolutionKind::CoordinateTiming,
                record,
                reason,
            ));
        }
        None
    }

    /// Add every planned edge to the store.
    ///
    /// Each resolution is applied as a unit: if any of its edges would
    /// create a cycle (or names a vanished task) none of them are added and
    /// the resolution is reported as rejected. Other resolutions are
    /// unaffected. Edges already present are reported, not duplicated.
    pub async fn apply(&self, resolutions: &[Resolution], store: &TaskStore) -> Vec<AppliedChange> {
        let mut changes = Vec::new();

        for resolution in resolutions {
            if resolution.kind.is_advisory() || resolution.edges.is_empty() {
                changes.push(AppliedChange::Advisory {
                    kind: resolution.kind,
                    participants: resolution.participants.clone(),
                    reason: resolution.reason.clone(),
                });
                continue;
            }

            let dep_type = resolution.dependency_type();
            let planned: Vec<(DependencyEdge, DependencyType)> = resolution
                .edges
                .iter()
                .map(|edge| (edge.clone(), dep_type.clone()))
                .collect();

            match store.add_dependencies(&planned).await {
                Ok(flags) => {
                    for (edge, added) in resolution.edges.iter().zip(flags) {
                        if added {
                            tracing::info!(kind = %resolution.kind, %edge, "dependency added");
                            changes.push(AppliedChange::EdgeAdded {
                                kind: resolution.kind,
                                edge: edge.clone(),
                            });
                        } else {
                            changes.push(AppliedChange::EdgeExisting {
                                kind: resolution.kind,
                                edge: edge.clone(),
                            });
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(kind = %resolution.kind, error = %e, "resolution rejected");
                    changes.push(AppliedChange::Rejected {
                        kind: resolution.kind,
                        participants: resolution.participants.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        changes
    }
}

/// Chain all tasks contesting `capability`, ordered by priority then id.
fn sequence(
    capability: String,
    members: &BTreeSet<TaskId>,
    tasks: &HashMap<TaskId, Task>,
) -> Resolution {
    let mut ordered: Vec<&Task> = members.iter().filter_map(|id| tasks.get(id)).collect();
    ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));

    let edges = ordered
        .windows(2)
        .map(|pair| DependencyEdge::new(pair[1].id, pair[0].id))
        .collect();

    Resolution {
        kind: ResolutionKind::SequenceCapabilityTasks,
        participants: ordered.iter().map(|t| t.id).collect(),
        edges,
        reason: format!("{} tasks compete for '{}'", ordered.len(), capability),
        capability: Some(capability),
    }
}
