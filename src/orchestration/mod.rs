//! # Orchestration
//!
//! The dispatch saga, leaves first:
//!
//! - [`DispatchPoller`]: submit a cluster and poll the solver until solved
//! - [`ConflictResolver`]: per-assignment lock, claim, commit or compensate
//! - [`DispatchOrchestrator`]: cluster saga and its two fan-out branches
//! - [`DispatchRuntime`]: spawns, tracks and resumes cluster executions
//! - [`GeoClusteringCoordinator`]: filters, cancels, clusters, starts

pub mod conflict_resolver;
pub mod context;
pub mod dispatch_orchestrator;
pub mod dispatch_poller;
pub mod geo_coordinator;
pub mod runtime;

pub use conflict_resolver::{AssignmentOutcome, ConflictResolver};
pub use context::SagaContext;
pub use dispatch_orchestrator::{DispatchOrchestrator, DispatchSummary};
pub use dispatch_poller::{DispatchPoller, PollOutcome};
pub use geo_coordinator::{CoordinatorRun, GeoClusteringCoordinator};
pub use runtime::DispatchRuntime;
