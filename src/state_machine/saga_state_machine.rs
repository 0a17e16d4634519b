//! Checkpointed state machine shared by every saga scope

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::persistence::{CheckpointStore, NewTransition};
use super::states::SagaState;
use crate::error::{DispatchError, Result};

/// Transition table of one saga state type
pub trait SagaTransitions: SagaState + Default {
    type Event: Serialize + std::fmt::Debug + Send + Sync;

    fn event_name(event: &Self::Event) -> &'static str;

    /// Target state for `event`, or a state transition error
    fn determine_target_state(&self, event: &Self::Event) -> Result<Self>;
}

/// One scope's state machine, resumed from its latest checkpoint
pub struct SagaStateMachine<S: SagaTransitions> {
    execution_id: Uuid,
    scope: String,
    current: S,
    resumed: bool,
    persisted: bool,
    store: Arc<dyn CheckpointStore>,
}

impl<S: SagaTransitions> SagaStateMachine<S> {
    /// Load the scope's latest checkpoint, or start from the default state
    pub async fn load(
        store: Arc<dyn CheckpointStore>,
        execution_id: Uuid,
        scope: impl Into<String>,
    ) -> Result<Self> {
        let scope = scope.into();
        let (current, resumed) = match store.resolve_current(execution_id, &scope).await? {
            Some(checkpoint) => (serde_json::from_value(checkpoint.to_state)?, true),
            None => (S::default(), false),
        };

        if resumed {
            debug!(
                execution_id = %execution_id,
                scope = %scope,
                state = %current,
                "Resumed state machine from checkpoint"
            );
        }

        Ok(Self {
            execution_id,
            scope,
            current,
            resumed,
            persisted: resumed,
            store,
        })
    }

    pub fn current(&self) -> &S {
        &self.current
    }

    /// Whether a checkpoint existed when the machine was loaded
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Apply `event`, persist the transition, and return the new state
    pub async fn transition(&mut self, event: S::Event) -> Result<&S> {
        if self.current.is_terminal() {
            return Err(DispatchError::state_transition(
                &self.current,
                S::event_name(&event),
            ));
        }
        let target = self.current.determine_target_state(&event)?;

        self.store
            .append(NewTransition {
                execution_id: self.execution_id,
                scope: self.scope.clone(),
                from_state: Some(serde_json::to_value(&self.current)?),
                to_state: serde_json::to_value(&target)?,
                event: S::event_name(&event).to_string(),
                terminal: target.is_terminal(),
            })
            .await?;
        self.persisted = true;

        debug!(
            execution_id = %self.execution_id,
            scope = %self.scope,
            from = %self.current,
            to = %target,
            event = S::event_name(&event),
            "State transition"
        );

        self.current = target;
        Ok(&self.current)
    }

    /// Persist the initial state so the scope is visible before its first event
    pub async fn checkpoint_initial(&mut self) -> Result<()> {
        if self.persisted {
            return Ok(());
        }
        self.store
            .append(NewTransition {
                execution_id: self.execution_id,
                scope: self.scope.clone(),
                from_state: None,
                to_state: serde_json::to_value(&self.current)?,
                event: "initialized".to_string(),
                terminal: self.current.is_terminal(),
            })
            .await?;
        self.persisted = true;
        Ok(())
    }
}

impl<S: SagaTransitions + std::fmt::Debug> std::fmt::Debug for SagaStateMachine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaStateMachine")
            .field("execution_id", &self.execution_id)
            .field("scope", &self.scope)
            .field("current", &self.current)
            .finish()
    }
}
