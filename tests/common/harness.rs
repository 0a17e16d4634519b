//! In-memory runtime with scriptable external handlers
//!
//! Lock commands are served by the real [`LockManager`] over an
//! [`InMemoryDispatchStore`]; the solver, the stream and the driver
//! notifier are test doubles. Every command goes through the invoker with
//! history enabled, so tests assert on exactly what was called.

use dispatch_core::config::DispatchConfig;
use dispatch_core::error::InvokerError;
use dispatch_core::execution::{handler_fn, CommandType, HandlerRegistry, TaskInvoker};
use dispatch_core::locking::{register_lock_handlers, InMemoryDispatchStore, LockManager};
use dispatch_core::models::{DispatchSolution, Order};
use dispatch_core::orchestration::{DispatchRuntime, SagaContext};
use dispatch_core::state_machine::InMemoryCheckpointStore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PROBLEM_ID: &str = "problem-1";

pub struct TestHarness {
    pub config: Arc<DispatchConfig>,
    pub registry: Arc<HandlerRegistry>,
    pub store: Arc<InMemoryDispatchStore>,
    pub locks: Arc<LockManager>,
    pub checkpoints: Arc<InMemoryCheckpointStore>,
    pub invoker: Arc<TaskInvoker>,
    pub runtime: Arc<DispatchRuntime>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::for_testing())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Self::assemble(
            Arc::new(config),
            Arc::new(InMemoryDispatchStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
        )
    }

    /// A fresh process over the same durable stores, as after a crash.
    /// Only lock, stream and notifier handlers are registered; script the
    /// solver again if the resumed run needs it.
    pub fn restart(&self) -> Self {
        Self::assemble(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.checkpoints),
        )
    }

    fn assemble(
        config: Arc<DispatchConfig>,
        store: Arc<InMemoryDispatchStore>,
        checkpoints: Arc<InMemoryCheckpointStore>,
    ) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let locks = Arc::new(LockManager::with_store(Arc::clone(&store), &config.locking));
        register_lock_handlers(&registry, Arc::clone(&locks));
        registry.register(
            CommandType::SendToKinesis,
            handler_fn("stream", |_payload| async { Ok(json!({})) }),
        );
        registry.register(
            CommandType::SendToDriver,
            handler_fn("notifier", |_payload| async { Ok(Value::Null) }),
        );

        let invoker = Arc::new(TaskInvoker::new(Arc::clone(&registry), &config.invoker));
        let ctx = SagaContext::new(Arc::clone(&invoker), checkpoints.clone(), Arc::clone(&config));
        let runtime = Arc::new(DispatchRuntime::new(ctx));

        Self {
            config,
            registry,
            store,
            locks,
            checkpoints,
            invoker,
            runtime,
        }
    }

    /// Solver that answers "in progress" `in_progress` times, then `solution`
    pub fn script_solver(&self, in_progress: usize, solution: DispatchSolution) {
        self.registry.register(
            CommandType::InvokeDispatch,
            handler_fn("solver", |_payload| async { Ok(json!({"problemId": PROBLEM_ID})) }),
        );

        let queries = Arc::new(AtomicUsize::new(0));
        let solution = Arc::new(solution);
        self.registry.register(
            CommandType::QueryDispatch,
            handler_fn("solver", move |_payload| {
                let answered = queries.fetch_add(1, Ordering::SeqCst);
                let solution = Arc::clone(&solution);
                async move {
                    if answered < in_progress {
                        Ok(json!({"inProgress": true}))
                    } else {
                        Ok(json!({
                            "inProgress": false,
                            "unassigned": solution.unassigned,
                            "assigned": solution.assigned,
                        }))
                    }
                }
            }),
        );
    }

    /// Solver that never finishes
    pub fn script_stuck_solver(&self) {
        self.script_solver(usize::MAX, DispatchSolution::default());
    }

    /// Fail a command permanently for every call
    pub fn reject(&self, command: CommandType, message: &'static str) {
        self.registry.register(
            command,
            handler_fn("rejecting", move |_payload| async move {
                Err::<Value, _>(InvokerError::rejected(command.as_str(), message))
            }),
        );
    }

    /// Fail a command transiently for every call
    pub fn make_unavailable(&self, command: CommandType) {
        self.registry.register(
            command,
            handler_fn("unavailable", move |_payload| async move {
                Err::<Value, _>(InvokerError::unavailable(command.as_str()))
            }),
        );
    }

    /// Clustering that groups valid orders in pairs and appends one empty
    /// cluster, which must be skipped
    pub fn script_pairwise_clustering(&self) {
        self.registry.register(
            CommandType::GeoClustering,
            handler_fn("clustering", |payload| async move {
                let orders: Vec<Order> = serde_json::from_value(payload["orders"].clone())
                    .map_err(|e| InvokerError::serialization("geoClustering", e.to_string()))?;
                let mut clusters: Vec<Value> = orders
                    .chunks(2)
                    .map(|chunk| json!({"centroid": {"lat": 40.72, "lng": -74.0}, "orders": chunk}))
                    .collect();
                clusters.push(json!({"centroid": {"lat": 0.0, "lng": 0.0}, "orders": []}));
                Ok::<Value, InvokerError>(json!({ "clusters": clusters }))
            }),
        );
    }

    /// Number of invocations of `command`, failed ones included
    pub fn calls(&self, command: CommandType) -> usize {
        self.invoker.history_for(command).len()
    }

    pub fn payloads(&self, command: CommandType) -> Vec<Value> {
        self.invoker
            .history_for(command)
            .into_iter()
            .map(|execution| execution.payload)
            .collect()
    }

    /// Commands in invocation order
    pub fn command_log(&self) -> Vec<CommandType> {
        self.invoker
            .history()
            .into_iter()
            .map(|execution| execution.command)
            .collect()
    }

    /// Wait until `command` has been invoked at least `count` times
    pub async fn wait_for_calls(&self, command: CommandType, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls(command) < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("command was not invoked in time");
    }
}
