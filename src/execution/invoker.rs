//! # Task Invoker
//!
//! Executes one named command against the handler registered for it and
//! returns the handler's response or a typed [`InvokerError`]. The invoker
//! applies a per-command timeout and optionally records a bounded history,
//! but never retries: retry policy belongs to the calling step.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::InvokerConfig;
use crate::error::InvokerError;
use crate::execution::command::CommandType;
use crate::execution::command_router::HandlerRegistry;
use crate::execution::message_protocols::CommandRequest;

/// One recorded invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandExecution {
    pub command_id: Uuid,
    pub command: CommandType,
    pub payload: Value,
    pub success: bool,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub executed_at: DateTime<Utc>,
}

/// Command invoker shared by every saga component
pub struct TaskInvoker {
    registry: Arc<HandlerRegistry>,
    command_timeout: Duration,
    enable_history: bool,
    max_history_size: usize,
    history: Mutex<VecDeque<CommandExecution>>,
}

impl TaskInvoker {
    pub fn new(registry: Arc<HandlerRegistry>, config: &InvokerConfig) -> Self {
        Self {
            registry,
            command_timeout: config.command_timeout(),
            enable_history: config.enable_history,
            max_history_size: config.max_history_size,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Execute `command` with a raw JSON payload
    pub async fn invoke(&self, command: CommandType, payload: Value) -> Result<Value, InvokerError> {
        let command_id = Uuid::new_v4();
        let handler = self
            .registry
            .resolve(command)
            .ok_or_else(|| InvokerError::unavailable(command.as_str()))?;

        debug!(
            command = %command,
            command_id = %command_id,
            handler = handler.handler_name(),
            "Invoking command"
        );

        let recorded_payload = self.enable_history.then(|| payload.clone());
        let started = Instant::now();
        let result = match tokio::time::timeout(self.command_timeout, handler.handle(command, payload))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(InvokerError::timeout(
                command.as_str(),
                self.command_timeout.as_millis() as u64,
            )),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => debug!(
                command = %command,
                command_id = %command_id,
                execution_time_ms = elapsed_ms,
                "Command succeeded"
            ),
            Err(e) => warn!(
                command = %command,
                command_id = %command_id,
                execution_time_ms = elapsed_ms,
                error = %e,
                retryable = e.is_retryable(),
                "Command failed"
            ),
        }

        if let Some(payload) = recorded_payload {
            self.record(CommandExecution {
                command_id,
                command,
                payload,
                success: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
                execution_time_ms: elapsed_ms,
                executed_at: Utc::now(),
            });
        }

        result
    }

    /// Execute a typed request and decode its typed response
    pub async fn invoke_typed<R: CommandRequest>(&self, request: &R) -> Result<R::Response, InvokerError> {
        let command = R::COMMAND;
        let payload = serde_json::to_value(request)
            .map_err(|e| InvokerError::serialization(command.as_str(), e.to_string()))?;

        let response = match self.invoke(command, payload).await? {
            // Acknowledge-only handlers may answer with nothing
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        serde_json::from_value(response)
            .map_err(|e| InvokerError::serialization(command.as_str(), e.to_string()))
    }

    fn record(&self, execution: CommandExecution) {
        let mut history = self.history.lock();
        history.push_back(execution);
        while history.len() > self.max_history_size {
            history.pop_front();
        }
    }

    /// Recorded invocations, oldest first
    pub fn history(&self) -> Vec<CommandExecution> {
        self.history.lock().iter().cloned().collect()
    }

    /// Recorded invocations of one command, oldest first
    pub fn history_for(&self, command: CommandType) -> Vec<CommandExecution> {
        self.history
            .lock()
            .iter()
            .filter(|execution| execution.command == command)
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

impl std::fmt::Debug for TaskInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInvoker")
            .field("registry", &self.registry)
            .field("command_timeout", &self.command_timeout)
            .field("enable_history", &self.enable_history)
            .finish()
    }
}
