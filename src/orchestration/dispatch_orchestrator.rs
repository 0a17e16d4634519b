//! # Dispatch Orchestrator
//!
//! The cluster-level saga: submit and poll, then fan out into two
//! independent branches. Unassigned orders are republished one by one;
//! every assignment runs its own sub-saga. Neither branch, and no single
//! order or assignment inside a branch, can cancel its siblings: futures are
//! joined without short-circuiting.
//!
//! The overall execution timeout bounds submission and polling. Fan-out is
//! not cut short, since dropping a sub-saga between `lockDriver` and its
//! release would strand the driver lock until its TTL.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::conflict_resolver::{AssignmentOutcome, ConflictResolver};
use super::context::SagaContext;
use super::dispatch_poller::DispatchPoller;
use crate::error::{DispatchError, Result};
use crate::events::DispatchLifecycleEvent;
use crate::execution::message_protocols::SendToKinesisRequest;
use crate::log_saga;
use crate::models::{Assignment, Cluster, DispatchSolution, Order};
use crate::resilience::retry_with_backoff;
use crate::state_machine::{
    republish_scope, DispatchEvent, DispatchState, DispatchStateMachine, NewTransition,
    RepublishState, SagaState, CLUSTER_SCOPE,
};

/// Result of one cluster run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub execution_id: Uuid,
    pub problem_id: Option<String>,
    /// In-progress answers received during this run
    pub polls: u32,
    pub republished: usize,
    pub republish_failed: usize,
    pub committed: usize,
    pub recycled: usize,
    pub failed: usize,
    pub compensation_failed: usize,
    /// Name of the cluster state when the run returned
    pub final_state: String,
}

impl DispatchSummary {
    fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            ..Self::default()
        }
    }

    /// The cluster reached `done`
    pub fn is_done(&self) -> bool {
        self.final_state == "done"
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOrchestrator {
    ctx: SagaContext,
    poller: DispatchPoller,
    resolver: ConflictResolver,
}

impl DispatchOrchestrator {
    pub fn new(ctx: SagaContext) -> Self {
        Self {
            poller: DispatchPoller::new(ctx.clone()),
            resolver: ConflictResolver::new(ctx.clone()),
            ctx,
        }
    }

    /// Run (or resume) the saga for one cluster
    #[instrument(skip_all, fields(execution_id = %execution_id, orders = cluster.len()))]
    pub async fn run(&self, execution_id: Uuid, cluster: &Cluster) -> Result<DispatchSummary> {
        self.ctx
            .checkpoints
            .register_execution(execution_id, serde_json::to_value(cluster)?)
            .await?;

        let mut machine =
            DispatchStateMachine::load(self.ctx.checkpoints.clone(), execution_id, CLUSTER_SCOPE).await?;
        let mut summary = DispatchSummary::new(execution_id);

        if machine.is_terminal() {
            info!(execution_id = %execution_id, state = %machine.current(), "Cluster already finished");
            summary.final_state = machine.current().to_string();
            return Ok(summary);
        }

        if !machine.resumed() {
            log_saga!(info, "CLUSTER_STARTED", execution_id: execution_id, orders: cluster.len());
            self.ctx.events.publish(DispatchLifecycleEvent::ClusterStarted {
                execution_id,
                orders: cluster.len(),
            });
        }
        machine.checkpoint_initial().await?;

        if matches!(
            machine.current(),
            DispatchState::Submitting | DispatchState::Polling { .. }
        ) {
            let timeout = self.ctx.config.polling.execution_timeout();
            let polled = tokio::time::timeout(timeout, self.poller.run(&mut machine, cluster)).await;
            let failure = match polled {
                Ok(Ok(outcome)) => {
                    summary.polls = outcome.polls;
                    None
                }
                Ok(Err(e)) => Some(e),
                Err(_) => Some(DispatchError::ExecutionTimeout {
                    execution_id,
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            if let Some(err) = failure {
                return Err(self.fail(&mut machine, err).await);
            }
        }

        summary.problem_id = machine.current().problem_id().map(str::to_string);

        if matches!(machine.current(), DispatchState::Solved { .. }) {
            machine.transition(DispatchEvent::StartFanOut).await?;
        }

        let solution = match machine.current() {
            DispatchState::FanningOut { solution, .. } => solution.clone(),
            other => return Err(DispatchError::state_transition(other, "fan_out")),
        };
        self.fan_out(execution_id, &solution, &mut summary).await;

        if summary.compensation_failed == 0 {
            machine.transition(DispatchEvent::FanOutCompleted).await?;
            log_saga!(
                info,
                "CLUSTER_DONE",
                execution_id: execution_id,
                committed: summary.committed,
                recycled: summary.recycled,
                failed: summary.failed,
                republished: summary.republished
            );
            self.ctx.events.publish(DispatchLifecycleEvent::ClusterDone {
                execution_id,
                committed: summary.committed,
                recycled: summary.recycled,
                failed: summary.failed + summary.republish_failed,
            });
        } else {
            error!(
                execution_id = %execution_id,
                compensation_failed = summary.compensation_failed,
                "Cluster left in fan-out until parked compensation is recovered"
            );
        }

        summary.final_state = machine.current().to_string();
        Ok(summary)
    }

    /// Record a fatal failure for this cluster only
    async fn fail(&self, machine: &mut DispatchStateMachine, err: DispatchError) -> DispatchError {
        let execution_id = machine.execution_id();
        let reason = err.to_string();
        error!(execution_id = %execution_id, error = %reason, "Cluster dispatch failed");

        if let Err(persist) = machine.transition(DispatchEvent::Fail { reason: reason.clone() }).await {
            error!(execution_id = %execution_id, error = %persist, "Failed to checkpoint cluster failure");
        }
        self.ctx
            .events
            .publish(DispatchLifecycleEvent::ClusterFailed { execution_id, reason });
        err
    }

    async fn fan_out(&self, execution_id: Uuid, solution: &DispatchSolution, summary: &mut DispatchSummary) {
        let (republished, outcomes) = tokio::join!(
            self.republish_unassigned(execution_id, &solution.unassigned),
            self.dispatch_assignments(execution_id, &solution.assigned),
        );

        for published in republished {
            if published {
                summary.republished += 1;
            } else {
                summary.republish_failed += 1;
            }
        }
        for outcome in outcomes {
            match outcome {
                AssignmentOutcome::Committed => summary.committed += 1,
                AssignmentOutcome::Recycled { .. } => summary.recycled += 1,
                AssignmentOutcome::Failed { .. } => summary.failed += 1,
                AssignmentOutcome::CompensationFailed { .. } => summary.compensation_failed += 1,
            }
        }
    }

    /// Publish each unassigned order on its own; one failure never blocks
    /// the others
    async fn republish_unassigned(&self, execution_id: Uuid, orders: &[Order]) -> Vec<bool> {
        join_all(orders.iter().map(|order| self.republish(execution_id, order))).await
    }

    async fn republish(&self, execution_id: Uuid, order: &Order) -> bool {
        let scope = republish_scope(&order.order_id);
        match self.ctx.checkpoints.resolve_current(execution_id, &scope).await {
            Ok(Some(checkpoint))
                if matches!(
                    serde_json::from_value::<RepublishState>(checkpoint.to_state.clone()),
                    Ok(RepublishState::Published)
                ) =>
            {
                return true;
            }
            Ok(_) => {}
            Err(e) => warn!(execution_id = %execution_id, error = %e, "Could not read republish checkpoint"),
        }

        let request = SendToKinesisRequest {
            orders: vec![order.clone()],
            orders_released: None,
        };
        let result = retry_with_backoff("sendToKinesis", &self.ctx.step_policy(), |_| {
            self.ctx.invoker.invoke_typed(&request)
        })
        .await;

        let state = match &result {
            Ok(_) => {
                self.ctx.events.publish(DispatchLifecycleEvent::OrderRepublished {
                    execution_id,
                    order_id: order.order_id.clone(),
                });
                RepublishState::Published
            }
            Err(e) => {
                warn!(
                    execution_id = %execution_id,
                    order_id = %order.order_id,
                    error = %e,
                    "Republish of unassigned order failed"
                );
                self.ctx.events.publish(DispatchLifecycleEvent::OrderRepublishFailed {
                    execution_id,
                    order_id: order.order_id.clone(),
                    reason: e.to_string(),
                });
                RepublishState::Failed {
                    reason: e.to_string(),
                }
            }
        };

        if let Err(e) = self.checkpoint_republish(execution_id, scope, &state).await {
            warn!(execution_id = %execution_id, error = %e, "Could not checkpoint republish");
        }
        result.is_ok()
    }

    async fn checkpoint_republish(&self, execution_id: Uuid, scope: String, state: &RepublishState) -> Result<()> {
        self.ctx
            .checkpoints
            .append(NewTransition {
                execution_id,
                scope,
                from_state: None,
                to_state: serde_json::to_value(state)?,
                event: state.to_string(),
                terminal: state.is_terminal(),
            })
            .await?;
        Ok(())
    }

    /// Run every assignment sub-saga concurrently
    async fn dispatch_assignments(&self, execution_id: Uuid, assignments: &[Assignment]) -> Vec<AssignmentOutcome> {
        join_all(assignments.iter().map(|assignment| async move {
            match self.resolver.run(execution_id, assignment).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Checkpoint store failure: the sub-saga resumes from its
                    // last persisted transition
                    error!(
                        execution_id = %execution_id,
                        driver_id = %assignment.driver_id,
                        error = %e,
                        "Assignment sub-saga interrupted; left for recovery"
                    );
                    let reason = e.to_string();
                    self.ctx.events.publish(DispatchLifecycleEvent::CompensationFailed {
                        execution_id,
                        driver_id: assignment.driver_id.clone(),
                        reason: reason.clone(),
                    });
                    AssignmentOutcome::CompensationFailed { reason }
                }
            }
        }))
        .await
    }
}
