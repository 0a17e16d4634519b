//! # Dispatch Error Types
//!
//! Structured error handling for the dispatch saga using thiserror.
//!
//! Two layers exist: [`InvokerError`] is what a single command invocation can
//! produce, and [`DispatchError`] is the crate-level error every orchestration
//! component returns. Lock contention is never an error; it is a normal saga
//! outcome carried in command responses.

use thiserror::Error;
use uuid::Uuid;

/// Failure of a single command invocation against an external handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokerError {
    /// No handler registered, or the handler reported itself unavailable
    #[error("Handler unavailable for command {command}")]
    HandlerUnavailable { command: String },

    /// Handler ran and refused the request
    #[error("Handler rejected command {command}: {message}")]
    HandlerRejected { command: String, message: String },

    /// Handler did not answer within the configured per-command timeout
    #[error("Command {command} timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// Request or response payload did not match the command contract
    #[error("Payload serialization failed for command {command}: {message}")]
    Serialization { command: String, message: String },
}

impl InvokerError {
    /// Create a handler unavailable error
    pub fn unavailable(command: impl Into<String>) -> Self {
        Self::HandlerUnavailable {
            command: command.into(),
        }
    }

    /// Create a handler rejected error
    pub fn rejected(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerRejected {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(command: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            command: command.into(),
            timeout_ms,
        }
    }

    /// Create a serialization error
    pub fn serialization(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Transient failures may succeed on a later attempt; rejections and
    /// contract mismatches will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::HandlerUnavailable { .. } | Self::Timeout { .. })
    }

    /// Name of the command that failed
    pub fn command(&self) -> &str {
        match self {
            Self::HandlerUnavailable { command }
            | Self::HandlerRejected { command, .. }
            | Self::Timeout { command, .. }
            | Self::Serialization { command, .. } => command,
        }
    }
}

/// Crate-level error for every orchestration component
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invocation failed: {0}")]
    Invoker(#[from] InvokerError),

    #[error("Store operation {operation} failed: {message}")]
    Store { operation: String, message: String },

    #[error("Invalid state transition from {from} on event {event}")]
    StateTransition { from: String, event: String },

    #[error("Solver contract violated for problem {problem_id}: {reason}")]
    SolverContract { problem_id: String, reason: String },

    #[error("Execution {execution_id} exceeded its timeout of {timeout_ms}ms")]
    ExecutionTimeout { execution_id: Uuid, timeout_ms: u64 },

    #[error("Compensation for driver {driver_id} exhausted after {attempts} attempts")]
    CompensationExhausted { driver_id: String, attempts: u32 },

    #[error("Execution {execution_id} not found")]
    ExecutionNotFound { execution_id: Uuid },

    #[error("Execution {execution_id} aborted: {message}")]
    ExecutionAborted { execution_id: Uuid, message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigurationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Create a store error
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a state transition error
    pub fn state_transition(from: impl ToString, event: impl Into<String>) -> Self {
        Self::StateTransition {
            from: from.to_string(),
            event: event.into(),
        }
    }

    /// Create a solver contract error
    pub fn solver_contract(problem_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SolverContract {
            problem_id: problem_id.into(),
            reason: reason.into(),
        }
    }

    /// Only transient invocation failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Invoker(err) => err.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
