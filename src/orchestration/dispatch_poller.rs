//! # Dispatch Poller
//!
//! Submits one cluster to the solver and polls until the solver reports
//! completion. The only suspension point is the fixed-interval sleep
//! between queries.
//!
//! Progress is checkpointed: once `Polling { problem_id }` is recorded a
//! resumed run continues querying that problem and never resubmits.

use tracing::{debug, info, instrument};

use super::context::SagaContext;
use crate::error::{DispatchError, Result};
use crate::events::DispatchLifecycleEvent;
use crate::execution::message_protocols::{InvokeDispatchRequest, QueryDispatchRequest};
use crate::log_saga;
use crate::models::{Cluster, DispatchProblem, DispatchSolution};
use crate::resilience::retry_with_backoff;
use crate::state_machine::{DispatchEvent, DispatchState, DispatchStateMachine};

/// Solved problem handed to the fan-out
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub problem: DispatchProblem,
    /// In-progress answers received before the solution
    pub polls: u32,
}

#[derive(Debug, Clone)]
pub struct DispatchPoller {
    ctx: SagaContext,
}

impl DispatchPoller {
    pub fn new(ctx: SagaContext) -> Self {
        Self { ctx }
    }

    /// Drive `machine` from `Submitting` or `Polling` to `Solved`
    #[instrument(skip_all, fields(execution_id = %machine.execution_id()))]
    pub async fn run(&self, machine: &mut DispatchStateMachine, cluster: &Cluster) -> Result<PollOutcome> {
        let execution_id = machine.execution_id();

        if matches!(machine.current(), DispatchState::Submitting) {
            let problem_id = self.submit(machine, cluster).await?;
            machine
                .transition(DispatchEvent::Submitted {
                    problem_id: problem_id.clone(),
                })
                .await?;
            self.ctx.events.publish(DispatchLifecycleEvent::ClusterSubmitted {
                execution_id,
                problem_id,
            });
        }

        let mut in_progress_polls = match machine.current() {
            DispatchState::Polling { polls, .. } => *polls,
            _ => 0,
        };
        loop {
            let problem_id = match machine.current() {
                DispatchState::Polling { problem_id, .. } => problem_id.clone(),
                DispatchState::Solved { problem_id, solution } => {
                    let mut problem = DispatchProblem::submitted(problem_id.clone(), cluster.clone());
                    problem.solve(solution.clone());
                    return Ok(PollOutcome {
                        problem,
                        polls: in_progress_polls,
                    });
                }
                other => return Err(DispatchError::state_transition(other, "poll")),
            };

            tokio::time::sleep(self.ctx.config.polling.interval()).await;

            let request = QueryDispatchRequest {
                problem_id: problem_id.clone(),
                centroid: cluster.centroid,
                orders: cluster.orders.clone(),
            };
            let response = retry_with_backoff("queryDispatch", &self.ctx.step_policy(), |_| {
                self.ctx.invoker.invoke_typed(&request)
            })
            .await?;

            if response.in_progress {
                in_progress_polls += 1;
                debug!(problem_id = %problem_id, polls = in_progress_polls, "Solver still in progress");
                machine.transition(DispatchEvent::StillInProgress).await?;
                continue;
            }

            let solution = DispatchSolution {
                unassigned: response.unassigned,
                assigned: response.assigned,
            };
            solution
                .validate_against(&cluster.orders)
                .map_err(|reason| DispatchError::solver_contract(&problem_id, reason))?;

            info!(
                problem_id = %problem_id,
                polls = in_progress_polls,
                assigned = solution.assigned.len(),
                unassigned = solution.unassigned.len(),
                "Solver finished"
            );
            self.ctx.events.publish(DispatchLifecycleEvent::ClusterSolved {
                execution_id,
                problem_id: problem_id.clone(),
                assigned: solution.assigned.len(),
                unassigned: solution.unassigned.len(),
                polls: in_progress_polls,
            });
            machine.transition(DispatchEvent::Solved { solution }).await?;
        }
    }

    async fn submit(&self, machine: &DispatchStateMachine, cluster: &Cluster) -> Result<String> {
        let execution_id = machine.execution_id();
        let request = InvokeDispatchRequest {
            centroid: cluster.centroid,
            orders: cluster.orders.clone(),
            execution_id,
        };
        let response = retry_with_backoff("invokeDispatch", &self.ctx.step_policy(), |_| {
            self.ctx.invoker.invoke_typed(&request)
        })
        .await?;

        log_saga!(info, "SUBMITTED", execution_id: execution_id, problem_id: response.problem_id, orders: cluster.len());
        Ok(response.problem_id)
    }
}
