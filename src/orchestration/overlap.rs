//! Pairwise similarity between task descriptors.
//!
//! Two signals come out of a pass over the live tasks:
//! - `OverlappingWork`: the weighted name/capability score crossed the
//!   overlap threshold, or the two tasks have the same signature hash.
//! - `CapabilityConflict`: the tasks share at least one required
//!   capability, whatever their score. The resolver uses this to sequence
//!   work rather than to merge it.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::OverlapConfig;
use crate::core::{Task, TaskId};

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+").unwrap());

/// Words that carry no signal when comparing task names.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "for", "from", "in", "into", "of", "on", "the", "to", "with",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapKind {
    OverlappingWork,
    CapabilityConflict,
}

impl std::fmt::Display for OverlapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlapKind::OverlappingWork => write!(f, "overlapping_work"),
            OverlapKind::CapabilityConflict => write!(f, "capability_conflict"),
        }
    }
}

/// One detected relationship between two live tasks. `task_a` is always
/// the older of the pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapRecord {
    pub task_a: TaskId,
    pub task_b: TaskId,
    /// Weighted similarity in [0, 1].
    pub score: f64,
    pub reason: String,
    pub kind: OverlapKind,
    /// Required capabilities both tasks list.
    pub shared_capabilities: BTreeSet<String>,
}

/// Lowercased alphanumeric words of `text`, minus stop words and single
/// characters.
pub fn name_tokens(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| t.len() >= 2 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// |a ∩ b| / |a ∪ b|, defined as 0 when both sets are empty.
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[derive(Debug, Clone, Default)]
pub struct OverlapDetector {
    config: OverlapConfig,
}

impl OverlapDetector {
    pub fn new(config: OverlapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OverlapConfig {
        &self.config
    }

    /// `name_weight * J(name tokens) + capability_weight * J(capabilities)`.
    pub fn score(&self, a: &Task, b: &Task) -> f64 {
        let (name, caps) = self.components(a, b);
        self.config.name_weight * name + self.config.capability_weight * caps
    }

    fn components(&self, a: &Task, b: &Task) -> (f64, f64) {
        (
            jaccard(&name_tokens(&a.name), &name_tokens(&b.name)),
            jaccard(&a.required_capabilities, &b.required_capabilities),
        )
    }

    /// Compare every pair of live tasks in `tasks`.
    ///
    /// Finished tasks are ignored. Pairs are visited in creation order, so
    /// the same input always yields the same records in the same order.
    pub fn detect(&self, tasks: &[Task]) -> Vec<OverlapRecord> {
        let mut live: Vec<&Task> = tasks.iter().filter(|t| t.is_live()).collect();
        live.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut records = Vec::new();
        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                self.compare(a, b, &mut records);
            }
        }

        tracing::debug!(
            tasks = live.len(),
            records = records.len(),
            "overlap detection finished"
        );
        records
    }

    fn compare(&self, a: &Task, b: &Task, records: &mut Vec<OverlapRecord>) {
        let shared: BTreeSet<String> = a
            .required_capabilities
            .intersection(&b.required_capabilities)
            .cloned()
            .collect();
        let (name_sim, cap_sim) = self.components(a, b);
        let score = self.config.name_weight * name_sim + self.config.capability_weight * cap_sim;

        if a.signature_hash == b.signature_hash {
            records.push(OverlapRecord {
                task_a: a.id,
                task_b: b.id,
                score: 1.0,
                reason: "identical signature".to_string(),
                kind: OverlapKind::OverlappingWork,
                shared_capabilities: shared.clone(),
            });
        } else if score > self.config.overlap_threshold {
            records.push(OverlapRecord {
                task_a: a.id,
                task_b: b.id,
                score,
                reason: format!(
                    "name similarity {:.2}, capability similarity {:.2}",
                    name_sim, cap_sim
                ),
                kind: OverlapKind::OverlappingWork,
                shared_capabilities: shared.clone(),
            });
        }

        if !shared.is_empty() {
            let names: Vec<&str> = shared.iter().map(String::as_str).collect();
            records.push(OverlapRecord {
                task_a: a.id,
                task_b: b.id,
                score,
                reason: format!("shared capabilities: {}", names.join(", ")),
                kind: OverlapKind::CapabilityConflict,
                shared_capabilities: shared,
            });
        }
    }
}
