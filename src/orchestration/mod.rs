//! Orchestration layer.
//!
//! The pieces that act on the store: eligibility matching, the claim state
//! machine, overlap detection and resolution, and the liveness monitor.
//! [`crate::orchestrator::Orchestrator`] wires them together.

pub mod coordinator;
pub mod liveness;
pub mod matcher;
pub mod overlap;
pub mod resolver;

pub use coordinator::{Caller, ClaimCoordinator};
pub use liveness::{spawn_periodic, LivenessMonitor, MonitorHandle, SweepReport, TIMEOUT_REASON};
pub use matcher::{can_handle, dependencies_satisfied};
pub use overlap::{jaccard, name_tokens, OverlapDetector, OverlapKind, OverlapRecord};
pub use resolver::{AppliedChange, ConflictResolver, Resolution, ResolutionKind};
