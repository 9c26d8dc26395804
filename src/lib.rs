pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod orchestrator;
pub mod persistence;
pub mod source;
pub mod status;
pub mod store;
pub mod util;

pub use context::OrchestrationContext;
pub use error::{Error, ErrorKind, Result};
pub use orchestrator::{IngestReport, NewTask, Orchestrator};
