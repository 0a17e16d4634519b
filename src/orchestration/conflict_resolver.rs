//! # Conflict Resolver
//!
//! Runs the per-assignment sub-saga: lock the driver, claim the orders,
//! then either notify the driver or compensate and recycle.
//!
//! Ordering inside one sub-saga is strict: `lockDriver` precedes
//! `updateOrdersStatus`, which precedes either `sendToDriver` or the release
//! sequence. Every transition is checkpointed under the assignment's scope,
//! so a resumed sub-saga in `Locked` continues at `Updating` and never calls
//! `lockDriver` again.
//!
//! A step that fails while the driver lock may be held does not end the
//! sub-saga: it abandons the claims and runs the conflict compensation, so
//! the lock is released and the orders go back to `NEW` and are recycled.
//!
//! Release calls use the compensation retry budget. If that budget runs
//! out the sub-saga parks in `CompensationFailed` and is logged at error;
//! recovery resumes it from the step that failed.

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::context::SagaContext;
use crate::constants::BatchUpdateStatus;
use crate::error::{DispatchError, InvokerError, Result};
use crate::events::DispatchLifecycleEvent;
use crate::execution::message_protocols::{
    LockDriverRequest, ReleaseDriverLockRequest, ReleaseOrdersLockRequest, SendToDriverRequest,
    SendToKinesisRequest, UpdateOrdersStatusRequest,
};
use crate::log_saga;
use crate::models::{Assignment, OrderId, OrderLockEntry, OrderLockOutcome};
use crate::resilience::retry_with_backoff;
use crate::state_machine::{AssignmentEvent, AssignmentState, AssignmentStateMachine};

/// Terminal disposition of one assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentOutcome {
    Committed,
    Recycled { released: Option<Vec<OrderId>> },
    Failed { reason: String },
    /// Parked for recovery; the driver lock may still be held
    CompensationFailed { reason: String },
}

impl AssignmentOutcome {
    fn from_state(state: &AssignmentState) -> Option<Self> {
        match state {
            AssignmentState::Committed => Some(Self::Committed),
            AssignmentState::Recycled { released } => Some(Self::Recycled {
                released: released.clone(),
            }),
            AssignmentState::Failed { reason } => Some(Self::Failed {
                reason: reason.clone(),
            }),
            AssignmentState::CompensationFailed { reason, .. } => Some(Self::CompensationFailed {
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConflictResolver {
    ctx: SagaContext,
}

impl ConflictResolver {
    pub fn new(ctx: SagaContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(execution_id = %execution_id, driver_id = %assignment.driver_id))]
    pub async fn run(&self, execution_id: Uuid, assignment: &Assignment) -> Result<AssignmentOutcome> {
        let mut machine = AssignmentStateMachine::load(
            self.ctx.checkpoints.clone(),
            execution_id,
            assignment.scope(),
        )
        .await?;

        if machine.is_terminal() {
            // Finished before a restart; its events were already published
            if let Some(outcome) = AssignmentOutcome::from_state(machine.current()) {
                return Ok(outcome);
            }
        }
        machine.checkpoint_initial().await?;

        if matches!(machine.current(), AssignmentState::CompensationFailed { .. }) {
            warn!(execution_id = %execution_id, driver_id = %assignment.driver_id, "Resuming parked compensation");
            machine.transition(AssignmentEvent::ResumeCompensation).await?;
        }

        loop {
            let event = match machine.current().clone() {
                AssignmentState::Locking => match self.lock_driver(execution_id, assignment).await {
                    Ok(true) => AssignmentEvent::LockAcquired,
                    Ok(false) => AssignmentEvent::LockRejected,
                    // A refusal takes nothing, so there is no lock to hand back
                    Err(e @ InvokerError::HandlerRejected { .. }) => {
                        warn!(execution_id = %execution_id, driver_id = %assignment.driver_id, error = %e, "lockDriver refused");
                        AssignmentEvent::LockRejected
                    }
                    Err(e) => AssignmentEvent::StepFailed {
                        reason: e.to_string(),
                    },
                },
                AssignmentState::Locked => AssignmentEvent::BeginUpdate,
                AssignmentState::Updating => {
                    match self.update_orders_status(execution_id, assignment).await {
                        Ok((BatchUpdateStatus::AllAssigned, _)) => AssignmentEvent::OrdersAssigned,
                        Ok((BatchUpdateStatus::AnyConflict, status_list)) => {
                            AssignmentEvent::OrdersConflicted { status_list }
                        }
                        Err(e) => self.abandon_claims(execution_id, assignment, &e),
                    }
                }
                AssignmentState::AllAssigned => match self.send_to_driver(assignment).await {
                    Ok(()) => AssignmentEvent::DriverNotified,
                    Err(e) => self.abandon_claims(execution_id, assignment, &e),
                },
                AssignmentState::AnyConflict { .. } | AssignmentState::Aborting { .. } => {
                    match self.release_driver_lock(execution_id, assignment).await {
                        Ok(()) => AssignmentEvent::DriverLockReleased,
                        Err(e) => AssignmentEvent::CompensationExhausted {
                            reason: self.exhausted(assignment, &e),
                        },
                    }
                }
                AssignmentState::LockReleased { status_list } => {
                    match self
                        .release_orders_lock(execution_id, assignment, status_list)
                        .await
                    {
                        Ok(released) => AssignmentEvent::OrderLocksReleased { released },
                        Err(e) => AssignmentEvent::CompensationExhausted {
                            reason: self.exhausted(assignment, &e),
                        },
                    }
                }
                AssignmentState::LockFailed => match self.recycle(assignment, None).await {
                    Ok(()) => AssignmentEvent::OrdersRecycled,
                    Err(e) => AssignmentEvent::StepFailed {
                        reason: e.to_string(),
                    },
                },
                AssignmentState::OrdersReleased { released } => {
                    match self.recycle(assignment, Some(released)).await {
                        Ok(()) => AssignmentEvent::OrdersRecycled,
                        Err(e) => AssignmentEvent::StepFailed {
                            reason: e.to_string(),
                        },
                    }
                }
                terminal => {
                    let outcome = AssignmentOutcome::from_state(&terminal)
                        .unwrap_or(AssignmentOutcome::Failed {
                            reason: format!("unexpected state {terminal}"),
                        });
                    self.report(execution_id, assignment, &outcome);
                    return Ok(outcome);
                }
            };

            machine.transition(event).await?;
        }
    }

    async fn lock_driver(&self, execution_id: Uuid, assignment: &Assignment) -> std::result::Result<bool, InvokerError> {
        let request = LockDriverRequest {
            driver_id: assignment.driver_id.clone(),
            driver_identity: assignment.driver_identity.clone(),
            orders: assignment.orders.clone(),
            execution_id,
        };
        let response = retry_with_backoff("lockDriver", &self.ctx.step_policy(), |_| {
            self.ctx.invoker.invoke_typed(&request)
        })
        .await?;
        Ok(response.locked)
    }

    async fn update_orders_status(
        &self,
        execution_id: Uuid,
        assignment: &Assignment,
    ) -> std::result::Result<(BatchUpdateStatus, Vec<OrderLockEntry>), InvokerError> {
        let request = UpdateOrdersStatusRequest {
            driver_id: assignment.driver_id.clone(),
            driver_identity: assignment.driver_identity.clone(),
            orders: assignment.orders.clone(),
            execution_id,
        };
        let response = retry_with_backoff("updateOrdersStatus", &self.ctx.step_policy(), |_| {
            self.ctx.invoker.invoke_typed(&request)
        })
        .await?;
        Ok((response.status, response.status_list))
    }

    async fn send_to_driver(&self, assignment: &Assignment) -> std::result::Result<(), InvokerError> {
        let request = SendToDriverRequest {
            driver_id: assignment.driver_id.clone(),
            driver_identity: assignment.driver_identity.clone(),
            driver_location: assignment.driver_location,
            orders: assignment.orders.clone(),
        };
        retry_with_backoff("sendToDriver", &self.ctx.step_policy(), |_| {
            self.ctx.invoker.invoke_typed(&request)
        })
        .await?;
        Ok(())
    }

    async fn release_driver_lock(
        &self,
        execution_id: Uuid,
        assignment: &Assignment,
    ) -> std::result::Result<(), InvokerError> {
        let request = ReleaseDriverLockRequest {
            driver_id: assignment.driver_id.clone(),
            driver_identity: assignment.driver_identity.clone(),
            execution_id,
        };
        let policy = self.ctx.compensation_policy();
        let response = retry_with_backoff("releaseDriverLock", &policy, |_| {
            self.ctx.invoker.invoke_typed(&request)
        })
        .await?;
        if !response.released {
            // Already released or expired: nothing left to hand back
            info!(driver_id = %assignment.driver_id, "Driver lock was not held at release");
        }
        Ok(())
    }

    async fn release_orders_lock(
        &self,
        execution_id: Uuid,
        assignment: &Assignment,
        status_list: Vec<OrderLockEntry>,
    ) -> std::result::Result<Vec<OrderId>, InvokerError> {
        let request = ReleaseOrdersLockRequest {
            driver_id: assignment.driver_id.clone(),
            driver_identity: assignment.driver_identity.clone(),
            orders: assignment.orders.clone(),
            order_status_list: status_list,
            execution_id,
        };
        let policy = self.ctx.compensation_policy();
        let response = retry_with_backoff("releaseOrdersLock", &policy, |_| {
            self.ctx.invoker.invoke_typed(&request)
        })
        .await?;
        Ok(response.released)
    }

    async fn recycle(
        &self,
        assignment: &Assignment,
        orders_released: Option<Vec<OrderId>>,
    ) -> std::result::Result<(), InvokerError> {
        let request = SendToKinesisRequest {
            orders: assignment.orders.clone(),
            orders_released,
        };
        retry_with_backoff("sendToKinesis", &self.ctx.step_policy(), |_| {
            self.ctx.invoker.invoke_typed(&request)
        })
        .await?;
        Ok(())
    }

    /// Hand back every order after a step failed under the driver lock
    ///
    /// Which orders were claimed is unknown after a timeout, so every order is
    /// listed; the release only touches the ones this execution holds.
    fn abandon_claims(&self, execution_id: Uuid, assignment: &Assignment, last: &InvokerError) -> AssignmentEvent {
        warn!(
            execution_id = %execution_id,
            driver_id = %assignment.driver_id,
            error = %last,
            "Step failed under driver lock; releasing claims and recycling orders"
        );
        AssignmentEvent::ClaimsAbandoned {
            reason: last.to_string(),
            status_list: assignment
                .order_ids()
                .into_iter()
                .map(|order_id| OrderLockEntry::new(order_id, OrderLockOutcome::Conflict))
                .collect(),
        }
    }

    /// Reason recorded when a release step gives up
    fn exhausted(&self, assignment: &Assignment, last: &InvokerError) -> String {
        let attempts = if last.is_retryable() {
            self.ctx.compensation_policy().max_attempts
        } else {
            1
        };
        let err = DispatchError::CompensationExhausted {
            driver_id: assignment.driver_id.clone(),
            attempts,
        };
        format!("{err}: {last}")
    }

    fn report(&self, execution_id: Uuid, assignment: &Assignment, outcome: &AssignmentOutcome) {
        let driver_id = assignment.driver_id.clone();
        match outcome {
            AssignmentOutcome::Committed => {
                log_saga!(info, "ASSIGNMENT_COMMITTED", execution_id: execution_id, driver_id: driver_id, orders: assignment.orders.len());
                self.ctx.events.publish(DispatchLifecycleEvent::AssignmentCommitted {
                    execution_id,
                    driver_id,
                    orders: assignment.order_ids(),
                });
            }
            AssignmentOutcome::Recycled { released } => {
                log_saga!(info, "ASSIGNMENT_RECYCLED", execution_id: execution_id, driver_id: driver_id, released: released);
                self.ctx.events.publish(DispatchLifecycleEvent::AssignmentRecycled {
                    execution_id,
                    driver_id,
                    orders: assignment.order_ids(),
                    released: released.clone(),
                });
            }
            AssignmentOutcome::Failed { reason } => {
                warn!(
                    execution_id = %execution_id,
                    driver_id = %driver_id,
                    reason = %reason,
                    "Assignment sub-saga failed"
                );
                self.ctx.events.publish(DispatchLifecycleEvent::AssignmentFailed {
                    execution_id,
                    driver_id,
                    reason: reason.clone(),
                });
            }
            AssignmentOutcome::CompensationFailed { reason } => {
                error!(
                    execution_id = %execution_id,
                    driver_id = %driver_id,
                    reason = %reason,
                    "Lock release retries exhausted; sub-saga parked for recovery"
                );
                self.ctx.events.publish(DispatchLifecycleEvent::CompensationFailed {
                    execution_id,
                    driver_id,
                    reason: reason.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::constants::OrderStatus;
    use crate::execution::{handler_fn, CommandType, HandlerRegistry, TaskInvoker};
    use crate::locking::{register_lock_handlers, InMemoryDispatchStore, LockManager, OrderStatusStore};
    use crate::models::{Coordinates, Order};
    use crate::state_machine::{CheckpointStore, InMemoryCheckpointStore};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        resolver: ConflictResolver,
        registry: Arc<HandlerRegistry>,
        invoker: Arc<TaskInvoker>,
        checkpoints: Arc<InMemoryCheckpointStore>,
        store: Arc<InMemoryDispatchStore>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(DispatchConfig::for_testing());
        let registry = Arc::new(HandlerRegistry::new());
        let store = Arc::new(InMemoryDispatchStore::new());
        register_lock_handlers(
            &registry,
            Arc::new(LockManager::with_store(store.clone(), &config.locking)),
        );
        registry.register(
            CommandType::SendToDriver,
            handler_fn("notifier", |_payload| async { Ok(json!({})) }),
        );
        registry.register(
            CommandType::SendToKinesis,
            handler_fn("stream", |_payload| async { Ok(json!({})) }),
        );
        let invoker = Arc::new(TaskInvoker::new(Arc::clone(&registry), &config.invoker));
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let ctx = SagaContext::new(Arc::clone(&invoker), checkpoints.clone(), config);
        Fixture {
            resolver: ConflictResolver::new(ctx),
            registry,
            invoker,
            checkpoints,
            store,
        }
    }

    async fn events(fx: &Fixture, execution_id: Uuid, work: &Assignment) -> Vec<String> {
        fx.checkpoints
            .transitions(execution_id, &work.scope())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.event)
            .collect()
    }

    fn assignment(driver_id: &str, ids: &[&str]) -> Assignment {
        let now = Utc::now();
        Assignment {
            driver_id: driver_id.to_string(),
            driver_identity: format!("Driver {driver_id}"),
            driver_location: Coordinates::new(1.0, 1.0),
            orders: ids
                .iter()
                .map(|id| {
                    Order::new(
                        *id,
                        Coordinates::new(0.0, 0.0),
                        Coordinates::new(0.1, 0.1),
                        now,
                        now + Duration::hours(1),
                    )
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_commit_path_is_checkpointed_in_order() {
        let fx = fixture();
        let execution_id = Uuid::new_v4();
        let work = assignment("d1", &["a", "b"]);

        let outcome = fx.resolver.run(execution_id, &work).await.unwrap();
        assert_eq!(outcome, AssignmentOutcome::Committed);

        let events: Vec<String> = fx
            .checkpoints
            .transitions(execution_id, &work.scope())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.event)
            .collect();
        assert_eq!(
            events,
            vec![
                "initialized",
                "lock_acquired",
                "begin_update",
                "orders_assigned",
                "driver_notified"
            ]
        );
    }

    #[tokio::test]
    async fn test_finished_sub_saga_replays_its_outcome_only() {
        let fx = fixture();
        let execution_id = Uuid::new_v4();
        let work = assignment("d1", &["a"]);

        fx.resolver.run(execution_id, &work).await.unwrap();
        let calls = fx.invoker.history().len();

        let again = fx.resolver.run(execution_id, &work).await.unwrap();
        assert_eq!(again, AssignmentOutcome::Committed);
        assert_eq!(fx.invoker.history().len(), calls);
    }

    #[tokio::test]
    async fn test_refused_lock_recycles_without_release() {
        let fx = fixture();
        fx.registry.register(
            CommandType::LockDriver,
            handler_fn("locks", |_payload| async {
                Err::<serde_json::Value, _>(InvokerError::rejected("lockDriver", "bad driver"))
            }),
        );
        let execution_id = Uuid::new_v4();

        let outcome = fx
            .resolver
            .run(execution_id, &assignment("d1", &["a"]))
            .await
            .unwrap();

        assert_eq!(outcome, AssignmentOutcome::Recycled { released: None });
        assert!(fx.invoker.history_for(CommandType::ReleaseDriverLock).is_empty());
        let recycled = fx.invoker.history_for(CommandType::SendToKinesis);
        assert_eq!(recycled.len(), 1);
        assert!(recycled[0].payload["ordersReleased"].is_null());
    }

    #[tokio::test]
    async fn test_lock_outage_releases_then_recycles() {
        let fx = fixture();
        fx.registry.register(
            CommandType::LockDriver,
            handler_fn("locks", |_payload| async {
                Err::<serde_json::Value, _>(InvokerError::unavailable("lockDriver"))
            }),
        );
        let execution_id = Uuid::new_v4();
        let work = assignment("d1", &["a"]);

        let outcome = fx.resolver.run(execution_id, &work).await.unwrap();

        assert_eq!(outcome, AssignmentOutcome::Recycled { released: None });
        // The lock may have been taken before the outage, so it is handed back
        assert_eq!(fx.invoker.history_for(CommandType::ReleaseDriverLock).len(), 1);
        assert_eq!(
            events(&fx, execution_id, &work).await,
            vec!["initialized", "step_failed", "driver_lock_released", "orders_recycled"]
        );
    }

    #[tokio::test]
    async fn test_failed_notification_unwinds_claims() {
        let fx = fixture();
        fx.registry.register(
            CommandType::SendToDriver,
            handler_fn("notifier", |_payload| async {
                Err::<serde_json::Value, _>(InvokerError::rejected("sendToDriver", "device offline"))
            }),
        );
        let execution_id = Uuid::new_v4();
        let work = assignment("d1", &["a", "b"]);

        let outcome = fx.resolver.run(execution_id, &work).await.unwrap();

        assert_eq!(
            outcome,
            AssignmentOutcome::Recycled {
                released: Some(vec!["a".to_string(), "b".to_string()])
            }
        );
        assert_eq!(fx.store.status_of("a"), OrderStatus::New);
        assert_eq!(fx.store.status_of("b"), OrderStatus::New);
        assert!(fx.store.held_drivers().is_empty());
        assert_eq!(
            events(&fx, execution_id, &work).await,
            vec![
                "initialized",
                "lock_acquired",
                "begin_update",
                "orders_assigned",
                "claims_abandoned",
                "driver_lock_released",
                "order_locks_released",
                "orders_recycled"
            ]
        );
        let recycled = fx.invoker.history_for(CommandType::SendToKinesis);
        assert_eq!(recycled.len(), 1);
        assert_eq!(recycled[0].payload["ordersReleased"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_update_timeout_after_claims_releases_them() {
        let fx = fixture();
        let store = fx.store.clone();
        // Claims land in the store, then the handler gives up
        fx.registry.register(
            CommandType::UpdateOrdersStatus,
            handler_fn("locks", move |payload| {
                let store = store.clone();
                async move {
                    let holder = payload["executionId"].as_str().unwrap_or_default().to_string();
                    store
                        .compare_and_set_status("a", OrderStatus::New, OrderStatus::Assigned, Some(&holder))
                        .await
                        .map_err(|e| InvokerError::rejected("updateOrdersStatus", e.to_string()))?;
                    Err::<serde_json::Value, _>(InvokerError::rejected("updateOrdersStatus", "partial write"))
                }
            }),
        );
        let execution_id = Uuid::new_v4();
        let work = assignment("d1", &["a", "b"]);

        let outcome = fx.resolver.run(execution_id, &work).await.unwrap();

        assert_eq!(
            outcome,
            AssignmentOutcome::Recycled {
                released: Some(vec!["a".to_string()])
            }
        );
        assert_eq!(fx.store.status_of("a"), OrderStatus::New);
        assert!(fx.store.held_drivers().is_empty());
        assert!(fx.invoker.history_for(CommandType::SendToDriver).is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_release_parks_with_attempt_count() {
        let fx = fixture();
        fx.registry.register(
            CommandType::UpdateOrdersStatus,
            handler_fn("locks", |_payload| async {
                Ok(json!({"status": "ANY_CONFLICT", "statusList": []}))
            }),
        );
        fx.registry.register(
            CommandType::ReleaseDriverLock,
            handler_fn("locks", |_payload| async {
                Err::<serde_json::Value, _>(InvokerError::unavailable("releaseDriverLock"))
            }),
        );
        let execution_id = Uuid::new_v4();
        let work = assignment("d1", &["a"]);

        let outcome = fx.resolver.run(execution_id, &work).await.unwrap();

        let AssignmentOutcome::CompensationFailed { reason } = outcome else {
            panic!("expected parked compensation, got {outcome:?}");
        };
        assert!(reason.contains("driver d1 exhausted after 5 attempts"), "{reason}");

        let current = fx
            .checkpoints
            .resolve_current(execution_id, &work.scope())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.to_state["state"], "compensation_failed");
        assert_eq!(current.to_state["resume_from"]["state"], "any_conflict");
        assert!(!current.terminal);
    }
}
