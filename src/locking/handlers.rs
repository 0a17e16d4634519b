//! In-process handlers for the store-backed commands
//!
//! `geoClustering`, `invokeDispatch`, `queryDispatch`, `sendToKinesis` and
//! `sendToDriver` are external collaborators registered by the host.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use super::lock_manager::LockManager;
use crate::error::{DispatchError, InvokerError};
use crate::execution::command::CommandType;
use crate::execution::command_router::{CommandHandler, HandlerRegistry};
use crate::execution::message_protocols::{
    CancelOrdersRequest, CancelOrdersResponse, FilterExpiredOrdersRequest,
    FilterExpiredOrdersResponse, LockDriverRequest, LockDriverResponse, ReleaseDriverLockRequest,
    ReleaseDriverLockResponse, ReleaseOrdersLockRequest, ReleaseOrdersLockResponse,
    UpdateOrdersStatusRequest,
};
use crate::models::partition_expired;

/// Commands served by [`LockCommandHandler`]
pub const LOCK_COMMANDS: [CommandType; 6] = [
    CommandType::FilterExpiredOrders,
    CommandType::CancelOrders,
    CommandType::LockDriver,
    CommandType::UpdateOrdersStatus,
    CommandType::ReleaseDriverLock,
    CommandType::ReleaseOrdersLock,
];

pub struct LockCommandHandler {
    manager: Arc<LockManager>,
}

impl LockCommandHandler {
    pub fn new(manager: Arc<LockManager>) -> Self {
        Self { manager }
    }
}

fn decode<T: DeserializeOwned>(command: CommandType, payload: Value) -> Result<T, InvokerError> {
    serde_json::from_value(payload)
        .map_err(|e| InvokerError::serialization(command.as_str(), e.to_string()))
}

fn encode<T: Serialize>(command: CommandType, response: &T) -> Result<Value, InvokerError> {
    serde_json::to_value(response)
        .map_err(|e| InvokerError::serialization(command.as_str(), e.to_string()))
}

/// Store failures are transient from the saga's point of view
fn store_failure(command: CommandType, error: DispatchError) -> InvokerError {
    warn!(command = %command, error = %error, "Lock store operation failed");
    InvokerError::unavailable(command.as_str())
}

#[async_trait]
impl CommandHandler for LockCommandHandler {
    async fn handle(&self, command: CommandType, payload: Value) -> Result<Value, InvokerError> {
        match command {
            CommandType::FilterExpiredOrders => {
                let request: FilterExpiredOrdersRequest = decode(command, payload)?;
                let (valid, expired) = partition_expired(request.orders, Utc::now());
                encode(command, &FilterExpiredOrdersResponse { valid, expired })
            }
            CommandType::CancelOrders => {
                let request: CancelOrdersRequest = decode(command, payload)?;
                let cancelled = self
                    .manager
                    .cancel_orders(&request.orders)
                    .await
                    .map_err(|e| store_failure(command, e))?;
                encode(command, &CancelOrdersResponse { cancelled })
            }
            CommandType::LockDriver => {
                let request: LockDriverRequest = decode(command, payload)?;
                let locked = self
                    .manager
                    .lock_driver(&request)
                    .await
                    .map_err(|e| store_failure(command, e))?;
                encode(command, &LockDriverResponse { locked })
            }
            CommandType::UpdateOrdersStatus => {
                let request: UpdateOrdersStatusRequest = decode(command, payload)?;
                let response = self
                    .manager
                    .update_orders_status(&request)
                    .await
                    .map_err(|e| store_failure(command, e))?;
                encode(command, &response)
            }
            CommandType::ReleaseDriverLock => {
                let request: ReleaseDriverLockRequest = decode(command, payload)?;
                let released = self
                    .manager
                    .release_driver_lock(&request)
                    .await
                    .map_err(|e| store_failure(command, e))?;
                encode(command, &ReleaseDriverLockResponse { released })
            }
            CommandType::ReleaseOrdersLock => {
                let request: ReleaseOrdersLockRequest = decode(command, payload)?;
                let released = self
                    .manager
                    .release_orders_lock(&request)
                    .await
                    .map_err(|e| store_failure(command, e))?;
                encode(command, &ReleaseOrdersLockResponse { released })
            }
            other => Err(InvokerError::rejected(
                other.as_str(),
                "not served by the lock handler",
            )),
        }
    }

    fn handler_name(&self) -> &str {
        "lock-manager"
    }
}

/// Bind the store-backed commands to `manager`
pub fn register_lock_handlers(registry: &HandlerRegistry, manager: Arc<LockManager>) {
    let handler: Arc<dyn CommandHandler> = Arc::new(LockCommandHandler::new(manager));
    registry.register_many(&LOCK_COMMANDS, handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockingConfig;
    use crate::locking::memory::InMemoryDispatchStore;
    use serde_json::json;

    fn registry() -> HandlerRegistry {
        let store = Arc::new(InMemoryDispatchStore::new());
        let manager = Arc::new(LockManager::with_store(store, &LockingConfig::default()));
        let registry = HandlerRegistry::new();
        register_lock_handlers(&registry, manager);
        registry
    }

    #[tokio::test]
    async fn test_registers_store_backed_commands_only() {
        let registry = registry();
        for command in LOCK_COMMANDS {
            assert!(registry.has_handler(command));
        }
        let missing = registry.missing_handlers();
        assert_eq!(
            missing,
            vec![
                CommandType::GeoClustering,
                CommandType::InvokeDispatch,
                CommandType::QueryDispatch,
                CommandType::SendToKinesis,
                CommandType::SendToDriver,
            ]
        );
    }

    #[tokio::test]
    async fn test_lock_driver_over_the_wire() {
        let registry = registry();
        let handler = registry.resolve(CommandType::LockDriver).unwrap();
        let payload = json!({
            "driverId": "d1",
            "driverIdentity": "Dana",
            "orders": [],
            "executionId": "6f1d7b1e-3c44-4d7a-9a53-0d6b1f1b8e01"
        });
        let first = handler
            .handle(CommandType::LockDriver, payload.clone())
            .await
            .unwrap();
        assert_eq!(first, json!({"locked": true}));

        let mut rival = payload;
        rival["executionId"] = json!("0b7e3a52-6a55-4e0e-8f57-2a1c4c7d9f10");
        let second = handler.handle(CommandType::LockDriver, rival).await.unwrap();
        assert_eq!(second, json!({"locked": false}));
    }

    #[tokio::test]
    async fn test_filter_expired_orders_partitions_by_deadline() {
        let registry = registry();
        let handler = registry.resolve(CommandType::FilterExpiredOrders).unwrap();
        let now = Utc::now();
        let order = |id: &str, expires_at: chrono::DateTime<Utc>| {
            json!({
                "orderId": id,
                "origin": {"lat": 0.0, "lng": 0.0},
                "destination": {"lat": 1.0, "lng": 1.0},
                "createdAt": now - chrono::Duration::hours(1),
                "expiresAt": expires_at,
            })
        };
        let response = handler
            .handle(
                CommandType::FilterExpiredOrders,
                json!({"orders": [
                    order("fresh", now + chrono::Duration::hours(1)),
                    order("stale", now - chrono::Duration::minutes(1)),
                ]}),
            )
            .await
            .unwrap();
        let parsed: FilterExpiredOrdersResponse = serde_json::from_value(response).unwrap();
        assert_eq!(parsed.valid[0].order_id, "fresh");
        assert_eq!(parsed.expired[0].order_id, "stale");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected_as_serialization() {
        let registry = registry();
        let handler = registry.resolve(CommandType::ReleaseOrdersLock).unwrap();
        let err = handler
            .handle(CommandType::ReleaseOrdersLock, json!({"driverId": 7}))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokerError::Serialization { .. }));
    }
}
