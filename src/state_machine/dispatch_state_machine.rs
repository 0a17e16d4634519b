//! Cluster-level transition table
//!
//! `Submitting -> Polling -> (Polling)* -> Solved -> FanningOut -> Done`,
//! with `Fail` allowed from any non-terminal state.

use super::events::DispatchEvent;
use super::saga_state_machine::{SagaStateMachine, SagaTransitions};
use super::states::DispatchState;
use crate::error::{DispatchError, Result};

pub type DispatchStateMachine = SagaStateMachine<DispatchState>;

impl SagaTransitions for DispatchState {
    type Event = DispatchEvent;

    fn event_name(event: &DispatchEvent) -> &'static str {
        event.name()
    }

    fn determine_target_state(&self, event: &DispatchEvent) -> Result<Self> {
        let target = match (self, event) {
            (Self::Submitting, DispatchEvent::Submitted { problem_id }) => Self::Polling {
                problem_id: problem_id.clone(),
                polls: 0,
            },

            (Self::Polling { problem_id, polls }, DispatchEvent::StillInProgress) => Self::Polling {
                problem_id: problem_id.clone(),
                polls: polls + 1,
            },
            (Self::Polling { problem_id, .. }, DispatchEvent::Solved { solution }) => Self::Solved {
                problem_id: problem_id.clone(),
                solution: solution.clone(),
            },

            (Self::Solved { problem_id, solution }, DispatchEvent::StartFanOut) => {
                Self::FanningOut {
                    problem_id: problem_id.clone(),
                    solution: solution.clone(),
                }
            }
            (Self::FanningOut { .. }, DispatchEvent::FanOutCompleted) => Self::Done,

            (from, DispatchEvent::Fail { reason }) if !matches!(from, Self::Done | Self::Failed { .. }) => {
                Self::Failed {
                    reason: reason.clone(),
                }
            }

            (from, event) => return Err(DispatchError::state_transition(from, event.name())),
        };

        Ok(target)
    }
}
