//! Per-assignment transition table
//!
//! ```text
//! Locking -> LockFailed -> Recycled{None}
//! Locking -> Locked -> Updating -> AllAssigned -> Committed
//! Updating -> AnyConflict -> LockReleased -> OrdersReleased -> Recycled{Some}
//! Locked | Updating | AllAssigned -> AnyConflict   (step failed after the lock)
//! Locking -> Aborting -> LockFailed                 (lockDriver outcome unknown)
//! ```
//!
//! Once the driver lock may be held, a failed step abandons every claim and
//! runs the same compensation chain as a conflict, so no order is left
//! `ASSIGNED` without a notified driver.
//!
//! A release step that exhausts its retries parks the sub-saga in
//! `CompensationFailed`, remembering the state to resume from.

use super::events::AssignmentEvent;
use super::saga_state_machine::{SagaStateMachine, SagaTransitions};
use super::states::AssignmentState;
use crate::error::{DispatchError, Result};

pub type AssignmentStateMachine = SagaStateMachine<AssignmentState>;

impl SagaTransitions for AssignmentState {
    type Event = AssignmentEvent;

    fn event_name(event: &AssignmentEvent) -> &'static str {
        event.name()
    }

    fn determine_target_state(&self, event: &AssignmentEvent) -> Result<Self> {
        use AssignmentEvent as E;
        use AssignmentState as S;

        let target = match (self, event) {
            (S::Locking, E::LockAcquired) => S::Locked,
            (S::Locking, E::LockRejected) => S::LockFailed,
            (S::Locked, E::BeginUpdate) => S::Updating,

            (S::Updating, E::OrdersAssigned) => S::AllAssigned,
            (S::Updating, E::OrdersConflicted { status_list }) => S::AnyConflict {
                status_list: status_list.clone(),
            },
            (S::AllAssigned, E::DriverNotified) => S::Committed,

            // Compensation chain
            (S::AnyConflict { status_list }, E::DriverLockReleased) => S::LockReleased {
                status_list: status_list.clone(),
            },
            (S::LockReleased { .. }, E::OrderLocksReleased { released }) => S::OrdersReleased {
                released: released.clone(),
            },

            // Recycling
            (S::LockFailed, E::OrdersRecycled) => S::Recycled { released: None },
            (S::OrdersReleased { released }, E::OrdersRecycled) => S::Recycled {
                released: Some(released.clone()),
            },

            // Step failures
            (S::Locked | S::Updating | S::AllAssigned, E::ClaimsAbandoned { status_list, .. }) => {
                S::AnyConflict {
                    status_list: status_list.clone(),
                }
            }
            (S::Locking, E::StepFailed { reason }) => S::Aborting {
                reason: reason.clone(),
            },
            (S::Aborting { .. }, E::DriverLockReleased) => S::LockFailed,
            (S::LockFailed | S::OrdersReleased { .. }, E::StepFailed { reason }) => S::Failed {
                reason: reason.clone(),
            },

            // Parking and resuming compensation
            (
                from @ (S::AnyConflict { .. } | S::LockReleased { .. } | S::Aborting { .. }),
                E::CompensationExhausted { reason },
            ) => S::CompensationFailed {
                resume_from: Box::new(from.clone()),
                reason: reason.clone(),
            },
            (S::CompensationFailed { resume_from, .. }, E::ResumeCompensation) => {
                (**resume_from).clone()
            }

            (from, event) => return Err(DispatchError::state_transition(from, event.name())),
        };

        Ok(target)
    }
}
