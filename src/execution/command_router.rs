//! Handler registry: resolves a command name to the handler that serves it

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::InvokerError;
use crate::execution::command::CommandType;

/// An external (or in-process) collaborator that serves one or more commands
///
/// Handlers receive the raw JSON payload and answer with a JSON response.
/// They must not retry internally; retry policy belongs to the calling step.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: CommandType, payload: Value) -> Result<Value, InvokerError>;

    /// Name for logs and history
    fn handler_name(&self) -> &str {
        "anonymous"
    }
}

/// Closure adapter so hosts and tests can register plain async functions
pub struct FnHandler<F> {
    name: String,
    handler: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, InvokerError>> + Send + 'static,
{
    async fn handle(&self, _command: CommandType, payload: Value) -> Result<Value, InvokerError> {
        (self.handler)(payload).await
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(name: impl Into<String>, handler: F) -> Arc<dyn CommandHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, InvokerError>> + Send + 'static,
{
    Arc::new(FnHandler::new(name, handler))
}

/// Registry of command handlers by command type
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<CommandType, Arc<dyn CommandHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any existing one for the command
    pub fn register(&self, command: CommandType, handler: Arc<dyn CommandHandler>) {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&command) {
            warn!(command = %command, "Replacing existing command handler");
        }
        info!(
            command = %command,
            handler = handler.handler_name(),
            "Registered command handler"
        );
        handlers.insert(command, handler);
    }

    /// Register one handler for several commands
    pub fn register_many(&self, commands: &[CommandType], handler: Arc<dyn CommandHandler>) {
        for command in commands {
            self.register(*command, Arc::clone(&handler));
        }
    }

    pub fn unregister(&self, command: CommandType) -> bool {
        let removed = self.handlers.write().remove(&command).is_some();
        if removed {
            info!(command = %command, "Unregistered command handler");
        } else {
            warn!(command = %command, "Attempted to unregister non-existent handler");
        }
        removed
    }

    pub fn resolve(&self, command: CommandType) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.read().get(&command).cloned()
    }

    pub fn has_handler(&self, command: CommandType) -> bool {
        self.handlers.read().contains_key(&command)
    }

    /// Commands with no registered handler
    pub fn missing_handlers(&self) -> Vec<CommandType> {
        let handlers = self.handlers.read();
        CommandType::ALL
            .iter()
            .copied()
            .filter(|command| !handlers.contains_key(command))
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let mut commands: Vec<&'static str> = handlers.keys().map(|c| c.as_str()).collect();
        commands.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("commands", &commands)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_resolve_and_unregister() {
        let registry = HandlerRegistry::new();
        assert!(!registry.has_handler(CommandType::SendToDriver));
        assert_eq!(registry.missing_handlers().len(), CommandType::ALL.len());

        registry.register(
            CommandType::SendToDriver,
            handler_fn("notifier", |_payload| async { Ok(json!({})) }),
        );
        let handler = registry.resolve(CommandType::SendToDriver).unwrap();
        assert_eq!(handler.handler_name(), "notifier");
        let response = handler
            .handle(CommandType::SendToDriver, json!({"driverId": "d1"}))
            .await
            .unwrap();
        assert_eq!(response, json!({}));

        assert!(registry.unregister(CommandType::SendToDriver));
        assert!(!registry.unregister(CommandType::SendToDriver));
    }

    #[test]
    fn test_register_many() {
        let registry = HandlerRegistry::new();
        registry.register_many(
            &[CommandType::InvokeDispatch, CommandType::QueryDispatch],
            handler_fn("solver", |_payload| async { Ok(Value::Null) }),
        );
        assert!(registry.has_handler(CommandType::InvokeDispatch));
        assert!(registry.has_handler(CommandType::QueryDispatch));
        assert!(!registry.missing_handlers().contains(&CommandType::QueryDispatch));
    }
}
