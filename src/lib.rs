#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Dispatch Core Rust
//!
//! Durable orchestration of order dispatch: incoming orders are filtered,
//! clustered by geography and submitted to an external solver. The solver's
//! assignments are committed through driver locks and order status claims,
//! and anything that cannot be committed is recycled onto the ingestion
//! stream.
//!
//! ## Architecture
//!
//! Every external effect is a named command served by a registered handler
//! and called through the [`execution::TaskInvoker`]. The saga itself is a
//! set of explicit state machines whose transitions are checkpointed, so a
//! crashed execution resumes at its last completed step:
//!
//! - [`orchestration::GeoClusteringCoordinator`] filters, cancels and
//!   clusters a batch, starting one execution per cluster
//! - [`orchestration::DispatchOrchestrator`] submits and polls one cluster,
//!   then fans out into republishing and per-driver assignment
//! - [`orchestration::ConflictResolver`] locks a driver, claims the orders,
//!   and either notifies the driver or releases and recycles
//!
//! ## Module Organization
//!
//! - [`models`] - Orders, clusters, solver problems, locks
//! - [`execution`] - Command vocabulary, handler registry, invoker
//! - [`locking`] - Driver lock and order status stores and lock commands
//! - [`state_machine`] - Saga states, transitions and checkpoints
//! - [`orchestration`] - Coordinator, orchestrator, poller, resolver, runtime
//! - [`resilience`] - Retry with exponential backoff
//! - [`events`] - Lifecycle event broadcast
//! - [`config`] - Layered TOML and environment configuration
//! - [`database`] - PostgreSQL pool and schema migrations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dispatch_core::config::DispatchConfig;
//! use dispatch_core::execution::{HandlerRegistry, TaskInvoker};
//! use dispatch_core::locking::{register_lock_handlers, InMemoryDispatchStore, LockManager};
//! use dispatch_core::orchestration::{DispatchRuntime, GeoClusteringCoordinator, SagaContext};
//! use dispatch_core::state_machine::InMemoryCheckpointStore;
//!
//! # async fn example() -> dispatch_core::Result<()> {
//! let config = Arc::new(DispatchConfig::default());
//! let registry = Arc::new(HandlerRegistry::new());
//! let locks = Arc::new(LockManager::with_store(
//!     Arc::new(InMemoryDispatchStore::new()),
//!     &config.locking,
//! ));
//! register_lock_handlers(&registry, locks);
//! // Register solver, clustering, stream and notification handlers here
//!
//! let invoker = Arc::new(TaskInvoker::new(registry, &config.invoker));
//! let ctx = SagaContext::new(invoker, Arc::new(InMemoryCheckpointStore::new()), config);
//! let coordinator = GeoClusteringCoordinator::new(Arc::new(DispatchRuntime::new(ctx)));
//! let run = coordinator.run(Vec::new()).await?;
//! println!("started {} cluster executions", run.executions.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
#[cfg(feature = "postgres")]
pub mod database;
pub mod error;
pub mod events;
pub mod execution;
pub mod locking;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod state_machine;

pub use config::{ConfigManager, DispatchConfig};
pub use constants::{BatchUpdateStatus, OrderStatus};
pub use error::{DispatchError, InvokerError, Result};
pub use events::{DispatchLifecycleEvent, EventPublisher};
pub use execution::{CommandType, HandlerRegistry, TaskInvoker};
pub use models::{Assignment, Cluster, Coordinates, DispatchSolution, Order, OrderId};
pub use orchestration::{
    DispatchOrchestrator, DispatchRuntime, DispatchSummary, GeoClusteringCoordinator, SagaContext,
};
