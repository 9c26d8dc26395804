//! Core domain models.
//!
//! Tasks, workers and the dependency graph between tasks. Nothing in here
//! locks or schedules; that lives in the store and orchestration layers.

pub mod dag;
pub mod task;
pub mod worker;

pub use dag::{DependencyEdge, DependencyGraph, DependencyType};
pub use task::{ImplementationNote, Priority, Task, TaskId, TaskStatus, TaskSummary};
pub use worker::{PerformanceStats, Worker, WorkerId, WorkerStatus};
