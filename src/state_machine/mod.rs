//! # Saga State Machines
//!
//! Tagged state enums with explicit transition tables for the cluster saga
//! and the per-assignment sub-saga, persisted as append-only checkpoints so
//! an interrupted execution resumes where it stopped.

pub mod assignment_state_machine;
pub mod dispatch_state_machine;
pub mod events;
pub mod persistence;
#[cfg(feature = "postgres")]
pub mod pg_persistence;
pub mod saga_state_machine;
pub mod states;

pub use assignment_state_machine::AssignmentStateMachine;
pub use dispatch_state_machine::DispatchStateMachine;
pub use events::{AssignmentEvent, DispatchEvent};
pub use persistence::{
    republish_scope, CheckpointStore, InMemoryCheckpointStore, NewTransition, SagaTransition,
    CLUSTER_SCOPE,
};
#[cfg(feature = "postgres")]
pub use pg_persistence::PgCheckpointStore;
pub use saga_state_machine::{SagaStateMachine, SagaTransitions};
pub use states::{AssignmentState, DispatchState, RepublishState, SagaState};
