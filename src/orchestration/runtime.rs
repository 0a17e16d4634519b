//! # Dispatch Runtime
//!
//! Owns the running cluster executions. Each cluster saga runs on its own
//! tokio task. Handles of running tasks are kept so callers can wait on a
//! cluster; once a task finishes its result moves to a bounded buffer until
//! it is collected, so fire-and-forget starts do not accumulate. After a
//! restart the runtime replays incomplete executions from the checkpoint
//! store.

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context::SagaContext;
use super::dispatch_orchestrator::{DispatchOrchestrator, DispatchSummary};
use crate::constants::DEFAULT_RESULT_RETENTION;
use crate::error::{DispatchError, Result};
use crate::events::EventPublisher;
use crate::models::Cluster;

type ExecutionHandle = JoinHandle<Result<DispatchSummary>>;

fn joined(
    execution_id: Uuid,
    outcome: std::result::Result<Result<DispatchSummary>, tokio::task::JoinError>,
) -> Result<DispatchSummary> {
    outcome.map_err(|e| DispatchError::ExecutionAborted {
        execution_id,
        message: e.to_string(),
    })?
}

#[derive(Default)]
struct Executions {
    running: HashMap<Uuid, ExecutionHandle>,
    /// Finished and not yet collected, oldest first
    completed: VecDeque<(Uuid, Result<DispatchSummary>)>,
}

impl Executions {
    /// Move finished handles into `completed`, dropping the oldest results
    /// beyond `retention`
    fn sweep(&mut self, retention: usize) {
        let finished: Vec<Uuid> = self
            .running
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(execution_id, _)| *execution_id)
            .collect();

        for execution_id in finished {
            if let Some(handle) = self.running.remove(&execution_id) {
                let result = match handle.now_or_never() {
                    Some(result) => joined(execution_id, result),
                    None => Err(DispatchError::ExecutionAborted {
                        execution_id,
                        message: "finished task produced no result".to_string(),
                    }),
                };
                self.completed.push_back((execution_id, result));
            }
        }

        while self.completed.len() > retention {
            if let Some((execution_id, _)) = self.completed.pop_front() {
                debug!(execution_id = %execution_id, "Dropping uncollected execution result");
            }
        }
    }

    fn take_completed(&mut self, execution_id: Uuid) -> Option<Result<DispatchSummary>> {
        let position = self.completed.iter().position(|(id, _)| *id == execution_id)?;
        self.completed.remove(position).map(|(_, result)| result)
    }
}

pub struct DispatchRuntime {
    ctx: SagaContext,
    orchestrator: Arc<DispatchOrchestrator>,
    executions: Mutex<Executions>,
    result_retention: usize,
}

impl DispatchRuntime {
    pub fn new(ctx: SagaContext) -> Self {
        Self {
            orchestrator: Arc::new(DispatchOrchestrator::new(ctx.clone())),
            ctx,
            executions: Mutex::new(Executions::default()),
            result_retention: DEFAULT_RESULT_RETENTION,
        }
    }

    /// Keep at most `retention` finished results that nobody waited for
    pub fn with_result_retention(mut self, retention: usize) -> Self {
        self.result_retention = retention;
        self
    }

    pub fn context(&self) -> &SagaContext {
        &self.ctx
    }

    pub fn events(&self) -> &EventPublisher {
        &self.ctx.events
    }

    /// Durably record a new cluster execution and start it in the background
    pub async fn start_cluster(&self, cluster: Cluster) -> Result<Uuid> {
        let execution_id = Uuid::new_v4();
        self.ctx
            .checkpoints
            .register_execution(execution_id, serde_json::to_value(&cluster)?)
            .await?;
        self.spawn(execution_id, cluster);
        Ok(execution_id)
    }

    fn spawn(&self, execution_id: Uuid, cluster: Cluster) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let handle = tokio::spawn(async move { orchestrator.run(execution_id, &cluster).await });

        let mut executions = self.executions.lock();
        executions.sweep(self.result_retention);
        if let Some(previous) = executions.running.insert(execution_id, handle) {
            if !previous.is_finished() {
                warn!(execution_id = %execution_id, "Replaced a running execution handle");
            }
        }
    }

    /// Wait for one execution started by this runtime
    pub async fn wait_for(&self, execution_id: Uuid) -> Result<DispatchSummary> {
        let handle = {
            let mut executions = self.executions.lock();
            executions.sweep(self.result_retention);
            if let Some(result) = executions.take_completed(execution_id) {
                return result;
            }
            executions
                .running
                .remove(&execution_id)
                .ok_or(DispatchError::ExecutionNotFound { execution_id })?
        };

        joined(execution_id, handle.await)
    }

    /// Wait for every execution currently tracked, collecting finished
    /// results first
    pub async fn wait_all(&self) -> Vec<(Uuid, Result<DispatchSummary>)> {
        let (mut results, handles) = {
            let mut executions = self.executions.lock();
            let completed: Vec<_> = executions.completed.drain(..).collect();
            let running: Vec<(Uuid, ExecutionHandle)> = executions.running.drain().collect();
            (completed, running)
        };

        let joined_results = join_all(
            handles
                .into_iter()
                .map(|(execution_id, handle)| async move { (execution_id, joined(execution_id, handle.await)) }),
        )
        .await;
        results.extend(joined_results);
        results
    }

    /// Executions still running
    pub fn in_flight(&self) -> usize {
        let mut executions = self.executions.lock();
        executions.sweep(self.result_retention);
        executions.running.len()
    }

    /// Running executions plus finished results not yet collected
    pub fn tracked(&self) -> usize {
        let executions = self.executions.lock();
        executions.running.len() + executions.completed.len()
    }

    /// Restart every checkpointed execution that has not finished and is not
    /// already running here
    pub async fn resume_incomplete(&self) -> Result<Vec<Uuid>> {
        let incomplete = self.ctx.checkpoints.incomplete_executions().await?;
        let mut resumed = Vec::with_capacity(incomplete.len());

        for execution_id in incomplete {
            let running = self
                .executions
                .lock()
                .running
                .get(&execution_id)
                .is_some_and(|handle| !handle.is_finished());
            if running {
                continue;
            }

            let input = self
                .ctx
                .checkpoints
                .execution_input(execution_id)
                .await?
                .ok_or(DispatchError::ExecutionNotFound { execution_id })?;
            let cluster: Cluster = serde_json::from_value(input)?;

            info!(execution_id = %execution_id, orders = cluster.len(), "Resuming incomplete execution");
            self.spawn(execution_id, cluster);
            resumed.push(execution_id);
        }

        Ok(resumed)
    }

    /// Stop every running execution without waiting. Checkpoints are kept,
    /// so the work can be picked up by [`Self::resume_incomplete`].
    pub fn abort_all(&self) {
        let mut executions = self.executions.lock();
        executions.completed.clear();
        for (execution_id, handle) in executions.running.drain() {
            if !handle.is_finished() {
                warn!(execution_id = %execution_id, "Aborting execution");
            }
            handle.abort();
        }
    }
}

impl std::fmt::Debug for DispatchRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let executions = self.executions.lock();
        f.debug_struct("DispatchRuntime")
            .field("running", &executions.running.len())
            .field("completed", &executions.completed.len())
            .field("result_retention", &self.result_retention)
            .finish()
    }
}
