//! Dependency graph between tasks.
//!
//! Edges point from a prerequisite to the task that waits on it. The graph
//! is kept acyclic: every insertion is preceded by a reachability test, so a
//! cycle is rejected before it exists.

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Why an edge exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DependencyType {
    /// Supplied with the task when it was added.
    #[default]
    Declared,
    /// Added by conflict resolution for two overlapping tasks.
    Overlap,
    /// Added to serialize tasks that compete for one capability.
    CapabilitySequence { capability: String },
}

impl DependencyType {
    /// Label without the capability payload, used for status counts.
    pub fn kind(&self) -> &'static str {
        match self {
            DependencyType::Declared => "declared",
            DependencyType::Overlap => "overlap",
            DependencyType::CapabilitySequence { .. } => "capability_sequence",
        }
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyType::Declared => write!(f, "declared"),
            DependencyType::Overlap => write!(f, "overlap"),
            DependencyType::CapabilitySequence { capability } => {
                write!(f, "capability: {}", capability)
            }
        }
    }
}

/// A requested edge: `dependent` waits for `prerequisite`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub dependent: TaskId,
    pub prerequisite: TaskId,
}

impl DependencyEdge {
    pub fn new(dependent: TaskId, prerequisite: TaskId) -> Self {
        Self {
            dependent,
            prerequisite,
        }
    }
}

impl std::fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.prerequisite.short(),
            self.dependent.short()
        )
    }
}

/// The task dependency graph.
#[derive(Clone)]
pub struct DependencyGraph {
    graph: DiGraph<TaskId, DependencyType>,
    task_index: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Add a task node. Adding an existing task returns its index.
    pub fn add_task(&mut self, id: TaskId) -> NodeIndex {
        if let Some(&index) = self.task_index.get(&id) {
            return index;
        }
        let index = self.graph.add_node(id);
        self.task_index.insert(id, index);
        index
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn index_of(&self, id: &TaskId) -> Result<NodeIndex> {
        self.task_index
            .get(id)
            .copied()
            .ok_or(Error::TaskNotFound(*id))
    }

    /// Whether `dependent -> prerequisite` would close a cycle, i.e. the
    /// prerequisite already (transitively) waits on the dependent.
    pub fn would_create_cycle(&self, edge: &DependencyEdge) -> Result<bool> {
        let dependent = self.index_of(&edge.dependent)?;
        let prerequisite = self.index_of(&edge.prerequisite)?;
        Ok(dependent == prerequisite
            || has_path_connecting(&self.graph, dependent, prerequisite, None))
    }

    /// Insert an edge. Returns `Ok(false)` when the edge already exists.
    ///
    /// # Errors
    /// - `TaskNotFound` if either endpoint is unknown
    /// - `DependencyCycle` if the edge would close a cycle
    pub fn add_dependency(&mut self, edge: &DependencyEdge, dep_type: DependencyType) -> Result<bool> {
        let dependent = self.index_of(&edge.dependent)?;
        let prerequisite = self.index_of(&edge.prerequisite)?;

        if self.graph.find_edge(prerequisite, dependent).is_some() {
            return Ok(false);
        }
        if self.would_create_cycle(edge)? {
            return Err(Error::DependencyCycle {
                dependent: edge.dependent,
                prerequisite: edge.prerequisite,
            });
        }

        self.graph.add_edge(prerequisite, dependent, dep_type);
        Ok(true)
    }

    /// Insert a batch of edges all-or-nothing. The batch is tried on a copy
    /// first, so a failing edge leaves the graph untouched. Returns one flag
    /// per edge, `false` for edges that were already present.
    pub fn add_dependencies(
        &mut self,
        edges: &[(DependencyEdge, DependencyType)],
    ) -> Result<Vec<bool>> {
        let mut trial = self.clone();
        let mut added = Vec::with_capacity(edges.len());
        for (edge, dep_type) in edges {
            added.push(trial.add_dependency(edge, dep_type.clone())?);
        }
        *self = trial;
        Ok(added)
    }

    /// Number of edges per [`DependencyType::kind`].
    pub fn edge_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for weight in self.graph.edge_weights() {
            *counts.entry(weight.kind().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
