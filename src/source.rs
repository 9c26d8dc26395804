//! Where new tasks come from.
//!
//! A [`TaskSource`] yields batches of [`TaskSpec`]s that
//! [`crate::orchestrator::Orchestrator::ingest`] turns into tasks. The only
//! built-in source reads a batch file:
//!
//! ```toml
//! [[tasks]]
//! name = "Audit login handler"
//! priority = "high"
//! estimated_minutes = 45
//! required_capabilities = ["security"]
//!
//! [[tasks]]
//! name = "Ship login fix"
//! required_capabilities = ["rust"]
//! dependencies = ["Audit login handler"]
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::Priority;
use crate::{Error, Result};

/// A task as described by its producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub estimated_minutes: u64,
    pub required_capabilities: BTreeSet<String>,
    /// Task ids, or names of tasks ingested earlier.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TaskSpec {
    /// # Errors
    /// `Validation` if the estimate does not fit in a `Duration` of seconds.
    pub fn estimated_duration(&self) -> Result<Duration> {
        self.estimated_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "estimated_minutes {} is too large",
                    self.estimated_minutes
                ))
            })
    }
}

pub trait TaskSource: Send {
    /// Next batch of specs. An empty batch means the source is exhausted.
    fn next_batch(&mut self) -> Result<Vec<TaskSpec>>;
}

#[derive(Debug, Deserialize)]
struct Batch {
    #[serde(default)]
    tasks: Vec<TaskSpec>,
}

/// Reads one TOML or JSON batch file, chosen by extension.
#[derive(Debug)]
pub struct FileTaskSource {
    path: PathBuf,
    consumed: bool,
}

impl FileTaskSource {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            consumed: false,
        }
    }

    fn parse(&self) -> Result<Vec<TaskSpec>> {
        let content = fs::read_to_string(&self.path)?;
        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let batch: Batch = match extension.as_deref() {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(Error::Validation(format!(
                    "unsupported task file {} (expected .toml or .json)",
                    self.path.display()
                )))
            }
        };
        Ok(batch.tasks)
    }
}

impl TaskSource for FileTaskSource {
    fn next_batch(&mut self) -> Result<Vec<TaskSpec>> {
        if self.consumed {
            return Ok(Vec::new());
        }
        let specs = self.parse()?;
        self.consumed = true;
        tracing::debug!(path = %self.path.display(), count = specs.len(), "read task batch");
        Ok(specs)
    }
}

/// Hands out pre-built batches in order; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticTaskSource {
    batches: std::collections::VecDeque<Vec<TaskSpec>>,
}

impl StaticTaskSource {
    pub fn new(batches: Vec<Vec<TaskSpec>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }
}

impl TaskSource for StaticTaskSource {
    fn next_batch(&mut self) -> Result<Vec<TaskSpec>> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }
}
