//! Durable mirror for tasks and workers.
//!
//! The in-memory store stays authoritative for the life of the process; the
//! mirror only exists so a later process can `restore` from it. Writes are
//! synchronous and are driven from a blocking thread by the store.
//!
//! Writes can land out of order (a timed-out attempt may still finish after
//! its retry), so every entry carries a revision and a write older than the
//! held one is dropped.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::core::{Task, TaskId, Worker, WorkerId};
use crate::{Error, Result};

pub trait PersistenceStore: Send + Sync {
    fn save_task(&self, task: &Task) -> Result<()>;
    fn save_worker(&self, worker: &Worker) -> Result<()>;
    fn load_all(&self) -> Result<(Vec<Task>, Vec<Worker>)>;
}

/// Everything the mirror knows, keyed for stable output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub tasks: BTreeMap<TaskId, Task>,
    pub workers: BTreeMap<WorkerId, Worker>,
}

impl Snapshot {
    /// Store `task` unless a newer revision is already held. Returns whether
    /// the snapshot changed.
    fn put_task(&mut self, task: &Task) -> bool {
        if let Some(existing) = self.tasks.get(&task.id) {
            if existing.revision > task.revision {
                tracing::debug!(task = %task.id, held = existing.revision, incoming = task.revision, "ignoring stale task write");
                return false;
            }
        }
        self.tasks.insert(task.id, task.clone());
        true
    }

    fn put_worker(&mut self, worker: &Worker) -> bool {
        if let Some(existing) = self.workers.get(&worker.id) {
            if existing.revision > worker.revision {
                tracing::debug!(worker = %worker.id, held = existing.revision, incoming = worker.revision, "ignoring stale worker write");
                return false;
            }
        }
        self.workers.insert(worker.id.clone(), worker.clone());
        true
    }

    fn into_parts(self) -> (Vec<Task>, Vec<Worker>) {
        (
            self.tasks.into_values().collect(),
            self.workers.into_values().collect(),
        )
    }
}

fn poisoned() -> Error {
    Error::Persistence("snapshot lock poisoned".to_string())
}

/// Keeps the mirror in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceStore for MemoryStore {
    fn save_task(&self, task: &Task) -> Result<()> {
        let mut snapshot = self.snapshot.lock().map_err(|_| poisoned())?;
        snapshot.put_task(task);
        Ok(())
    }

    fn save_worker(&self, worker: &Worker) -> Result<()> {
        let mut snapshot = self.snapshot.lock().map_err(|_| poisoned())?;
        snapshot.put_worker(worker);
        Ok(())
    }

    fn load_all(&self) -> Result<(Vec<Task>, Vec<Worker>)> {
        let snapshot = self.snapshot.lock().map_err(|_| poisoned())?;
        Ok(snapshot.clone().into_parts())
    }
}

/// Mirrors state into one pretty-printed JSON file. Each save rewrites the
/// file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    snapshot: Mutex<Snapshot>,
}

impl JsonFileStore {
    /// Open the store, reading the existing snapshot if the file exists.
    pub fn open(path: &Path) -> Result<Self> {
        let snapshot = if path.exists() {
            serde_json::from_str(&fs::read_to_string(path)?)?
        } else {
            Snapshot::default()
        };
        tracing::debug!(
            path = %path.display(),
            tasks = snapshot.tasks.len(),
            workers = snapshot.workers.len(),
            "JsonFileStore::open"
        );
        Ok(Self {
            path: path.to_path_buf(),
            snapshot: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistenceStore for JsonFileStore {
    fn save_task(&self, task: &Task) -> Result<()> {
        let mut snapshot = self.snapshot.lock().map_err(|_| poisoned())?;
        if !snapshot.put_task(task) {
            return Ok(());
        }
        self.write(&snapshot)
    }

    fn save_worker(&self, worker: &Worker) -> Result<()> {
        let mut snapshot = self.snapshot.lock().map_err(|_| poisoned())?;
        if !snapshot.put_worker(worker) {
            return Ok(());
        }
        self.write(&snapshot)
    }

    fn load_all(&self) -> Result<(Vec<Task>, Vec<Worker>)> {
        let snapshot = self.snapshot.lock().map_err(|_| poisoned())?;
        Ok(snapshot.clone().into_parts())
    }
}
