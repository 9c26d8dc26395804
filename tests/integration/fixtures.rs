//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building an orchestrator over an in-memory or file-backed mirror
//! - Registering workers and adding tasks with terse arguments

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tasklane::config::Config;
use tasklane::core::{Priority, TaskId, WorkerId};
use tasklane::{NewTask, OrchestrationContext, Orchestrator};

pub fn caps(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// An orchestrator plus whatever it needs to stay alive.
pub struct Harness {
    pub orch: Arc<Orchestrator>,
    /// Holds the state directory for file-backed harnesses.
    pub state_dir: Option<TempDir>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let ctx = OrchestrationContext::in_memory(config).expect("valid config");
        Self {
            orch: Arc::new(Orchestrator::new(ctx)),
            state_dir: None,
        }
    }

    /// Orchestrator mirrored to `state.json` in a fresh temp directory.
    pub fn file_backed() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let ctx = OrchestrationContext::with_state_file(Self::state_config(&dir))
            .expect("state file context");
        Self {
            orch: Arc::new(Orchestrator::new(ctx)),
            state_dir: Some(dir),
        }
    }

    /// Second orchestrator over the same state file, not yet restored.
    pub fn reopen(&self) -> Arc<Orchestrator> {
        let dir = self.state_dir.as_ref().expect("file-backed harness");
        let ctx = OrchestrationContext::with_state_file(Self::state_config(dir))
            .expect("state file context");
        Arc::new(Orchestrator::new(ctx))
    }

    fn state_config(dir: &TempDir) -> Config {
        Config {
            state_path: Some(dir.path().join("state.json").to_string_lossy().into_owned()),
            ..Default::default()
        }
    }

    pub async fn worker(&self, id: &str, capabilities: &[&str]) -> WorkerId {
        let worker_id = WorkerId::from(id);
        self.orch
            .register_worker(&worker_id, id, &caps(capabilities))
            .await
            .expect("register worker");
        worker_id
    }

    pub async fn task(&self, name: &str, priority: Priority, capabilities: &[&str]) -> TaskId {
        self.add(
            NewTask::new(name, capabilities.iter().copied())
                .priority(priority)
                .estimate(Duration::from_secs(30 * 60)),
        )
        .await
    }

    pub async fn add(&self, new: NewTask) -> TaskId {
        self.orch.add_task(new).await.expect("add task")
    }
}
