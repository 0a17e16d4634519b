//! Resuming interrupted executions from their checkpoints

mod common;

use common::*;
use async_trait::async_trait;
use dispatch_core::constants::OrderStatus;
use dispatch_core::error::{DispatchError, Result};
use dispatch_core::events::DispatchLifecycleEvent;
use dispatch_core::execution::CommandType;
use dispatch_core::locking::{holder_token, DriverLockStore};
use dispatch_core::models::Cluster;
use dispatch_core::orchestration::{DispatchOrchestrator, DispatchRuntime, SagaContext};
use dispatch_core::state_machine::{
    AssignmentEvent, AssignmentStateMachine, CheckpointStore, DispatchEvent, DispatchStateMachine,
    InMemoryCheckpointStore, NewTransition, SagaTransition, CLUSTER_SCOPE,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Checkpoint store that loses the first write of one event
struct OneLostWrite {
    inner: Arc<InMemoryCheckpointStore>,
    event: &'static str,
    lost: AtomicBool,
}

#[async_trait]
impl CheckpointStore for OneLostWrite {
    async fn register_execution(&self, execution_id: Uuid, input: Value) -> Result<()> {
        self.inner.register_execution(execution_id, input).await
    }

    async fn execution_input(&self, execution_id: Uuid) -> Result<Option<Value>> {
        self.inner.execution_input(execution_id).await
    }

    async fn append(&self, transition: NewTransition) -> Result<SagaTransition> {
        if transition.event == self.event && !self.lost.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::store("append", "connection reset"));
        }
        self.inner.append(transition).await
    }

    async fn resolve_current(&self, execution_id: Uuid, scope: &str) -> Result<Option<SagaTransition>> {
        self.inner.resolve_current(execution_id, scope).await
    }

    async fn transitions(&self, execution_id: Uuid, scope: &str) -> Result<Vec<SagaTransition>> {
        self.inner.transitions(execution_id, scope).await
    }

    async fn incomplete_executions(&self) -> Result<Vec<Uuid>> {
        self.inner.incomplete_executions().await
    }
}

async fn register(harness: &TestHarness, execution_id: Uuid, cluster: &Cluster) {
    harness
        .checkpoints
        .register_execution(execution_id, serde_json::to_value(cluster).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_crash_while_polling_resumes_without_resubmitting() {
    let harness = TestHarness::new();
    harness.script_stuck_solver();

    let execution_id = harness.runtime.start_cluster(cluster(&["a"])).await.unwrap();
    harness.wait_for_calls(CommandType::QueryDispatch, 2).await;
    harness.runtime.abort_all();
    assert_eq!(harness.calls(CommandType::InvokeDispatch), 1);

    let restarted = harness.restart();
    restarted.script_solver(0, SolutionBuilder::new().unassigned(&["a"]).build());
    let resumed = restarted.runtime.resume_incomplete().await.unwrap();
    assert_eq!(resumed, vec![execution_id]);

    let summary = restarted.runtime.wait_for(execution_id).await.unwrap();
    assert!(summary.is_done());
    assert_eq!(restarted.calls(CommandType::InvokeDispatch), 0);
    assert_eq!(restarted.calls(CommandType::QueryDispatch), 1);
    assert_eq!(
        restarted.payloads(CommandType::QueryDispatch)[0]["problemId"],
        PROBLEM_ID
    );
}

#[tokio::test]
async fn test_resume_from_polling_checkpoint_uses_recorded_problem() {
    let harness = TestHarness::new();
    let execution_id = Uuid::new_v4();
    let work = cluster(&["a", "b"]);
    register(&harness, execution_id, &work).await;

    let mut machine = DispatchStateMachine::load(harness.checkpoints.clone(), execution_id, CLUSTER_SCOPE)
        .await
        .unwrap();
    machine.checkpoint_initial().await.unwrap();
    machine
        .transition(DispatchEvent::Submitted {
            problem_id: "problem-recorded".to_string(),
        })
        .await
        .unwrap();
    machine.transition(DispatchEvent::StillInProgress).await.unwrap();

    harness.script_solver(0, SolutionBuilder::new().unassigned(&["a", "b"]).build());
    harness.runtime.resume_incomplete().await.unwrap();
    let summary = harness.runtime.wait_for(execution_id).await.unwrap();

    assert!(summary.is_done());
    assert_eq!(summary.problem_id.as_deref(), Some("problem-recorded"));
    // Counter continues from the checkpointed in-progress answer
    assert_eq!(summary.polls, 1);
    assert_eq!(harness.calls(CommandType::InvokeDispatch), 0);
    assert_eq!(
        harness.payloads(CommandType::QueryDispatch)[0]["problemId"],
        "problem-recorded"
    );
}

#[tokio::test]
async fn test_resumed_locked_assignment_does_not_lock_again() {
    let harness = TestHarness::new();
    let execution_id = Uuid::new_v4();
    let work = cluster(&["a"]);
    register(&harness, execution_id, &work).await;

    let solution = SolutionBuilder::new().assign("d1", &["a"]).build();
    let mut cluster_machine =
        DispatchStateMachine::load(harness.checkpoints.clone(), execution_id, CLUSTER_SCOPE)
            .await
            .unwrap();
    cluster_machine.checkpoint_initial().await.unwrap();
    cluster_machine
        .transition(DispatchEvent::Submitted {
            problem_id: PROBLEM_ID.to_string(),
        })
        .await
        .unwrap();
    cluster_machine
        .transition(DispatchEvent::Solved {
            solution: solution.clone(),
        })
        .await
        .unwrap();
    cluster_machine.transition(DispatchEvent::StartFanOut).await.unwrap();

    let mut sub_saga = AssignmentStateMachine::load(
        harness.checkpoints.clone(),
        execution_id,
        solution.assigned[0].scope(),
    )
    .await
    .unwrap();
    sub_saga.checkpoint_initial().await.unwrap();
    sub_saga.transition(AssignmentEvent::LockAcquired).await.unwrap();
    harness
        .store
        .try_acquire("d1", &holder_token(&execution_id), Duration::from_secs(60))
        .await
        .unwrap();

    harness.runtime.resume_incomplete().await.unwrap();
    let summary = harness.runtime.wait_for(execution_id).await.unwrap();

    assert!(summary.is_done());
    assert_eq!(summary.committed, 1);
    assert_eq!(harness.calls(CommandType::LockDriver), 0);
    assert_eq!(harness.calls(CommandType::UpdateOrdersStatus), 1);
    assert_eq!(harness.calls(CommandType::SendToDriver), 1);
    assert_eq!(harness.store.status_of("a"), OrderStatus::Assigned);
}

#[tokio::test]
async fn test_parked_compensation_is_resumed_after_restart() {
    let harness = TestHarness::new();
    // b is already claimed, so the batch conflicts and must release
    harness.script_solver(0, SolutionBuilder::new().assign("d1", &["a", "b"]).build());
    let rival = Uuid::new_v4();
    {
        use dispatch_core::locking::{OrderRecord, OrderStatusStore};
        let mut taken = OrderRecord::new("b", OrderStatus::Assigned);
        taken.holder = Some(holder_token(&rival));
        harness.store.upsert(taken).await.unwrap();
    }
    harness.make_unavailable(CommandType::ReleaseDriverLock);

    let execution_id = harness.runtime.start_cluster(cluster(&["a", "b"])).await.unwrap();
    let parked = harness.runtime.wait_for(execution_id).await.unwrap();

    assert_eq!(parked.compensation_failed, 1);
    assert_eq!(parked.final_state, "fanning_out");
    assert!(!parked.is_done());
    assert_eq!(
        harness.calls(CommandType::ReleaseDriverLock),
        harness.config.compensation.max_attempts as usize
    );
    // Still held: nothing was released
    assert_eq!(harness.store.held_drivers(), vec!["d1".to_string()]);
    assert_eq!(harness.store.status_of("a"), OrderStatus::Conflict);
    assert_eq!(
        harness.checkpoints.incomplete_executions().await.unwrap(),
        vec![execution_id]
    );

    let restarted = harness.restart();
    assert_eq!(restarted.runtime.resume_incomplete().await.unwrap(), vec![execution_id]);
    let summary = restarted.runtime.wait_for(execution_id).await.unwrap();

    assert!(summary.is_done());
    assert_eq!(summary.recycled, 1);
    assert_eq!(restarted.calls(CommandType::LockDriver), 0);
    assert_eq!(restarted.calls(CommandType::UpdateOrdersStatus), 0);
    assert_eq!(restarted.calls(CommandType::ReleaseDriverLock), 1);
    assert_eq!(restarted.calls(CommandType::ReleaseOrdersLock), 1);
    assert!(restarted.store.held_drivers().is_empty());
    assert_eq!(restarted.store.status_of("a"), OrderStatus::New);
    assert_eq!(restarted.store.status_of("b"), OrderStatus::Assigned);
}

#[tokio::test]
async fn test_finished_executions_are_not_resumed() {
    let harness = TestHarness::new();
    harness.script_solver(0, SolutionBuilder::new().unassigned(&["a"]).build());

    let work = cluster(&["a"]);
    let execution_id = harness.runtime.start_cluster(work.clone()).await.unwrap();
    assert!(harness.runtime.wait_for(execution_id).await.unwrap().is_done());

    assert!(harness.runtime.resume_incomplete().await.unwrap().is_empty());
    assert!(harness.checkpoints.incomplete_executions().await.unwrap().is_empty());

    // Re-running a finished execution replays nothing
    let calls_before = harness.invoker.history().len();
    let orchestrator = DispatchOrchestrator::new(harness.runtime.context().clone());
    let summary = orchestrator.run(execution_id, &work).await.unwrap();
    assert_eq!(summary.final_state, "done");
    assert_eq!(harness.invoker.history().len(), calls_before);
}

#[tokio::test]
async fn test_republished_orders_are_not_sent_twice_on_resume() {
    let harness = TestHarness::new();
    // x republishes fine; d1 parks its compensation so the cluster stays open
    harness.script_solver(
        0,
        SolutionBuilder::new().unassigned(&["x"]).assign("d1", &["a", "b"]).build(),
    );
    {
        use dispatch_core::locking::{OrderRecord, OrderStatusStore};
        harness
            .store
            .upsert(OrderRecord::new("b", OrderStatus::Cancelled))
            .await
            .unwrap();
    }
    harness.make_unavailable(CommandType::ReleaseDriverLock);

    let execution_id = harness.runtime.start_cluster(cluster(&["x", "a", "b"])).await.unwrap();
    let parked = harness.runtime.wait_for(execution_id).await.unwrap();
    assert_eq!(parked.republished, 1);
    assert_eq!(parked.compensation_failed, 1);

    let restarted = harness.restart();
    restarted.runtime.resume_incomplete().await.unwrap();
    let summary = restarted.runtime.wait_for(execution_id).await.unwrap();

    assert!(summary.is_done());
    // Only the recycle of the released batch reaches the stream
    let sent = restarted.payloads(CommandType::SendToKinesis);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["ordersReleased"], serde_json::json!(["a"]));
}

#[tokio::test]
async fn test_lost_checkpoint_write_is_recovered_without_relocking() {
    let harness = TestHarness::new();
    harness.script_solver(0, SolutionBuilder::new().assign("d1", &["a", "b"]).build());
    let flaky = Arc::new(OneLostWrite {
        inner: harness.checkpoints.clone(),
        event: "begin_update",
        lost: AtomicBool::new(false),
    });
    let runtime = DispatchRuntime::new(SagaContext::new(
        harness.invoker.clone(),
        flaky,
        harness.config.clone(),
    ));
    let mut rx = runtime.events().subscribe();

    let execution_id = runtime.start_cluster(cluster(&["a", "b"])).await.unwrap();
    let interrupted = runtime.wait_for(execution_id).await.unwrap();

    assert_eq!(interrupted.compensation_failed, 1);
    assert_eq!(interrupted.final_state, "fanning_out");
    let mut reported = false;
    while let Ok(published) = rx.try_recv() {
        if let DispatchLifecycleEvent::CompensationFailed { driver_id, reason, .. } = published.event {
            assert_eq!(driver_id, "d1");
            assert!(reason.contains("connection reset"), "{reason}");
            reported = true;
        }
    }
    assert!(reported);

    // The sub-saga's last durable state is Locked; nothing was claimed yet
    let current = harness
        .checkpoints
        .resolve_current(execution_id, "assignment:d1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.to_state["state"], "locked");
    assert_eq!(harness.calls(CommandType::LockDriver), 1);
    assert_eq!(harness.store.status_of("a"), OrderStatus::New);

    let restarted = harness.restart();
    assert_eq!(restarted.runtime.resume_incomplete().await.unwrap(), vec![execution_id]);
    let summary = restarted.runtime.wait_for(execution_id).await.unwrap();

    assert!(summary.is_done());
    assert_eq!(summary.committed, 1);
    assert_eq!(restarted.calls(CommandType::LockDriver), 0);
    assert_eq!(restarted.calls(CommandType::UpdateOrdersStatus), 1);
    assert_eq!(restarted.calls(CommandType::SendToDriver), 1);
    assert_eq!(restarted.store.status_of("a"), OrderStatus::Assigned);
    assert_eq!(restarted.store.status_of("b"), OrderStatus::Assigned);
}
