//! Append-only checkpoint persistence for saga state machines
//!
//! Every transition is appended with a per-scope `sort_key`; the latest
//! row carries `most_recent = true`. A scope is one state machine inside an
//! execution: the cluster saga, one assignment sub-saga, or one republish.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Scope of the cluster-level saga inside an execution
pub const CLUSTER_SCOPE: &str = "cluster";

/// Scope of the republish of one unassigned order
pub fn republish_scope(order_id: &str) -> String {
    format!("republish:{order_id}")
}

/// A transition about to be appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransition {
    pub execution_id: Uuid,
    pub scope: String,
    pub from_state: Option<Value>,
    pub to_state: Value,
    pub event: String,
    pub terminal: bool,
}

/// A persisted transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaTransition {
    pub execution_id: Uuid,
    pub scope: String,
    pub from_state: Option<Value>,
    pub to_state: Value,
    pub event: String,
    pub terminal: bool,
    pub sort_key: i32,
    pub most_recent: bool,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Record the input of a new execution so recovery can rebuild it
    async fn register_execution(&self, execution_id: Uuid, input: Value) -> Result<()>;

    async fn execution_input(&self, execution_id: Uuid) -> Result<Option<Value>>;

    async fn append(&self, transition: NewTransition) -> Result<SagaTransition>;

    /// Most recent transition of a scope
    async fn resolve_current(&self, execution_id: Uuid, scope: &str)
        -> Result<Option<SagaTransition>>;

    /// All transitions of a scope in `sort_key` order
    async fn transitions(&self, execution_id: Uuid, scope: &str) -> Result<Vec<SagaTransition>>;

    /// Registered executions whose cluster scope has not reached a terminal
    /// state, oldest first
    async fn incomplete_executions(&self) -> Result<Vec<Uuid>>;
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    executions: DashMap<Uuid, (DateTime<Utc>, Value)>,
    transitions: DashMap<(Uuid, String), Vec<SagaTransition>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scopes recorded for one execution
    pub fn scopes(&self, execution_id: Uuid) -> Vec<String> {
        let mut scopes: Vec<String> = self
            .transitions
            .iter()
            .filter(|entry| entry.key().0 == execution_id)
            .map(|entry| entry.key().1.clone())
            .collect();
        scopes.sort();
        scopes
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn register_execution(&self, execution_id: Uuid, input: Value) -> Result<()> {
        self.executions
            .entry(execution_id)
            .or_insert_with(|| (Utc::now(), input));
        Ok(())
    }

    async fn execution_input(&self, execution_id: Uuid) -> Result<Option<Value>> {
        Ok(self
            .executions
            .get(&execution_id)
            .map(|entry| entry.value().1.clone()))
    }

    async fn append(&self, transition: NewTransition) -> Result<SagaTransition> {
        let mut history = self
            .transitions
            .entry((transition.execution_id, transition.scope.clone()))
            .or_default();

        for previous in history.iter_mut() {
            previous.most_recent = false;
        }
        let record = SagaTransition {
            execution_id: transition.execution_id,
            scope: transition.scope,
            from_state: transition.from_state,
            to_state: transition.to_state,
            event: transition.event,
            terminal: transition.terminal,
            sort_key: history.len() as i32 + 1,
            most_recent: true,
            created_at: Utc::now(),
        };
        history.push(record.clone());
        Ok(record)
    }

    async fn resolve_current(
        &self,
        execution_id: Uuid,
        scope: &str,
    ) -> Result<Option<SagaTransition>> {
        Ok(self
            .transitions
            .get(&(execution_id, scope.to_string()))
            .and_then(|history| history.last().cloned()))
    }

    async fn transitions(&self, execution_id: Uuid, scope: &str) -> Result<Vec<SagaTransition>> {
        Ok(self
            .transitions
            .get(&(execution_id, scope.to_string()))
            .map(|history| history.clone())
            .unwrap_or_default())
    }

    async fn incomplete_executions(&self) -> Result<Vec<Uuid>> {
        let mut pending: Vec<(DateTime<Utc>, Uuid)> = self
            .executions
            .iter()
            .filter(|entry| {
                !self
                    .transitions
                    .get(&(*entry.key(), CLUSTER_SCOPE.to_string()))
                    .and_then(|history| history.last().map(|t| t.terminal))
                    .unwrap_or(false)
            })
            .map(|entry| (entry.value().0, *entry.key()))
            .collect();
        pending.sort();
        Ok(pending.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transition(execution_id: Uuid, scope: &str, to: &str, terminal: bool) -> NewTransition {
        NewTransition {
            execution_id,
            scope: scope.to_string(),
            from_state: None,
            to_state: json!({"state": to}),
            event: "test".to_string(),
            terminal,
        }
    }

    #[tokio::test]
    async fn test_append_tracks_sort_key_and_most_recent() {
        let store = InMemoryCheckpointStore::new();
        let exec = Uuid::new_v4();
        store
            .append(transition(exec, CLUSTER_SCOPE, "submitting", false))
            .await
            .unwrap();
        let second = store
            .append(transition(exec, CLUSTER_SCOPE, "polling", false))
            .await
            .unwrap();
        assert_eq!(second.sort_key, 2);

        let history = store.transitions(exec, CLUSTER_SCOPE).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].most_recent);
        assert!(history[1].most_recent);

        let current = store.resolve_current(exec, CLUSTER_SCOPE).await.unwrap().unwrap();
        assert_eq!(current.to_state["state"], "polling");
        assert!(store.resolve_current(exec, "assignment:d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_executions() {
        let store = InMemoryCheckpointStore::new();
        let finished = Uuid::new_v4();
        let running = Uuid::new_v4();
        let never_started = Uuid::new_v4();
        for exec in [finished, running, never_started] {
            store.register_execution(exec, json!({})).await.unwrap();
        }
        store
            .append(transition(finished, CLUSTER_SCOPE, "done", true))
            .await
            .unwrap();
        store
            .append(transition(running, CLUSTER_SCOPE, "polling", false))
            .await
            .unwrap();
        // A terminal sub-scope does not finish the execution
        store
            .append(transition(running, "assignment:d1", "committed", true))
            .await
            .unwrap();

        let mut incomplete = store.incomplete_executions().await.unwrap();
        incomplete.sort();
        let mut expected = vec![running, never_started];
        expected.sort();
        assert_eq!(incomplete, expected);
        assert_eq!(
            store.scopes(running),
            vec!["assignment:d1".to_string(), CLUSTER_SCOPE.to_string()]
        );
    }
}
