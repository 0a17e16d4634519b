//! Shared collaborators of every saga component

use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::events::EventPublisher;
use crate::execution::TaskInvoker;
use crate::resilience::RetryPolicy;
use crate::state_machine::CheckpointStore;

#[derive(Clone)]
pub struct SagaContext {
    pub invoker: Arc<TaskInvoker>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub events: EventPublisher,
    pub config: Arc<DispatchConfig>,
}

impl SagaContext {
    pub fn new(
        invoker: Arc<TaskInvoker>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: Arc<DispatchConfig>,
    ) -> Self {
        let events = EventPublisher::new(config.events.channel_capacity);
        Self {
            invoker,
            checkpoints,
            events,
            config,
        }
    }

    /// Budget for ordinary steps
    pub fn step_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.retry)
    }

    /// Budget for lock release compensation
    pub fn compensation_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.compensation)
    }
}

impl std::fmt::Debug for SagaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaContext")
            .field("invoker", &self.invoker)
            .field("config", &self.config)
            .finish()
    }
}
