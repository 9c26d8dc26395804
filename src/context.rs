//! The one shared context every component is built from.
//!
//! There is no process-wide state: the binary (or an embedding service)
//! builds an `OrchestrationContext` once and hands clones of it around.

use std::sync::Arc;

use crate::config::Config;
use crate::persistence::{JsonFileStore, MemoryStore, PersistenceStore};
use crate::store::TaskStore;
use crate::Result;

#[derive(Clone)]
pub struct OrchestrationContext {
    pub config: Arc<Config>,
    pub store: Arc<TaskStore>,
}

impl OrchestrationContext {
    /// Build a context around `mirror` after validating `config`.
    pub fn new(config: Config, mirror: Arc<dyn PersistenceStore>) -> Result<Self> {
        config.validate()?;
        let store = TaskStore::new(mirror, config.persist_timeout(), config.persist_retries);
        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
        })
    }

    /// Context whose durable mirror lives only in memory.
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Context mirrored to the JSON snapshot at the configured state path.
    pub fn with_state_file(config: Config) -> Result<Self> {
        let path = config.effective_state_path()?;
        let mirror = JsonFileStore::open(&path)?;
        tracing::debug!(path = %path.display(), "using JSON state file");
        Self::new(config, Arc::new(mirror))
    }
}

impl std::fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationContext")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish()
    }
}
