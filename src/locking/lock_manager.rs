//! # Lock Manager
//!
//! Driver reservation and per-order status claims for assignment sub-sagas.
//!
//! The holder token of every lock and order claim is the owning execution id,
//! so a resumed execution recognizes what it already holds and never
//! reacquires it.
//!
//! Order claims are all-or-nothing per batch: when any order in the batch is
//! already taken, every order this batch moved to `ASSIGNED` is parked in
//! `CONFLICT` and the batch reports `ANY_CONFLICT`. Parked orders go back to
//! `NEW` through [`LockManager::release_orders_lock`], which also parks any
//! claim a failed sub-saga left in `ASSIGNED`.

use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use super::store::{DispatchStore, DriverLockStore, OrderStatusStore};
use crate::config::LockingConfig;
use crate::constants::{BatchUpdateStatus, OrderStatus};
use crate::error::Result;
use crate::execution::message_protocols::{
    LockDriverRequest, ReleaseDriverLockRequest, ReleaseOrdersLockRequest,
    UpdateOrdersStatusRequest, UpdateOrdersStatusResponse,
};
use crate::log_lock;
use crate::models::{Order, OrderId, OrderLockEntry, OrderLockOutcome};

/// Holder token written to driver locks and order claims
pub fn holder_token(execution_id: &Uuid) -> String {
    execution_id.to_string()
}

pub struct LockManager {
    locks: Arc<dyn DriverLockStore>,
    orders: Arc<dyn OrderStatusStore>,
    lock_ttl: Duration,
}

impl LockManager {
    pub fn new(
        locks: Arc<dyn DriverLockStore>,
        orders: Arc<dyn OrderStatusStore>,
        config: &LockingConfig,
    ) -> Self {
        Self {
            locks,
            orders,
            lock_ttl: config.driver_lock_ttl(),
        }
    }

    /// Build from one store that serves both drivers and orders
    pub fn with_store<S: DispatchStore + 'static>(store: Arc<S>, config: &LockingConfig) -> Self {
        Self::new(store.clone(), store, config)
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    #[instrument(skip(self, request), fields(driver_id = %request.driver_id, execution_id = %request.execution_id))]
    pub async fn lock_driver(&self, request: &LockDriverRequest) -> Result<bool> {
        let holder = holder_token(&request.execution_id);
        let locked = self
            .locks
            .try_acquire(&request.driver_id, &holder, self.lock_ttl)
            .await?;

        if locked {
            log_lock!(info, "ACQUIRED", driver_id: request.driver_id, holder: holder, orders: request.orders.len());
        } else {
            log_lock!(info, "CONTENDED", driver_id: request.driver_id, holder: holder);
        }
        Ok(locked)
    }

    #[instrument(skip(self, request), fields(driver_id = %request.driver_id, execution_id = %request.execution_id))]
    pub async fn update_orders_status(
        &self,
        request: &UpdateOrdersStatusRequest,
    ) -> Result<UpdateOrdersStatusResponse> {
        let holder = holder_token(&request.execution_id);

        // Orders are only ever claimed under a live driver lock
        let lock_held = self
            .locks
            .current(&request.driver_id)
            .await?
            .is_some_and(|lock| lock.is_held_by(&holder, chrono::Utc::now()));
        if !lock_held {
            log_lock!(warn, "UPDATE_WITHOUT_LOCK", driver_id: request.driver_id, holder: holder);
            return Ok(UpdateOrdersStatusResponse {
                status: BatchUpdateStatus::AnyConflict,
                status_list: request
                    .orders
                    .iter()
                    .map(|order| OrderLockEntry::new(order.order_id.clone(), OrderLockOutcome::ClaimedElsewhere))
                    .collect(),
            });
        }

        let mut claimed = Vec::with_capacity(request.orders.len());
        let mut any_conflict = false;
        for order in &request.orders {
            if self.claim_order(&order.order_id, &holder).await? {
                claimed.push(true);
            } else {
                claimed.push(false);
                any_conflict = true;
            }
        }

        if !any_conflict {
            log_lock!(info, "ORDERS_ASSIGNED", driver_id: request.driver_id, orders: request.orders.len());
            return Ok(UpdateOrdersStatusResponse {
                status: BatchUpdateStatus::AllAssigned,
                status_list: request
                    .orders
                    .iter()
                    .map(|order| OrderLockEntry::new(order.order_id.clone(), OrderLockOutcome::Assigned))
                    .collect(),
            });
        }

        let mut status_list = Vec::with_capacity(request.orders.len());
        for (order, took) in request.orders.iter().zip(claimed) {
            let outcome = if took
                && self
                    .orders
                    .compare_and_set_status(
                        &order.order_id,
                        OrderStatus::Assigned,
                        OrderStatus::Conflict,
                        Some(&holder),
                    )
                    .await?
            {
                OrderLockOutcome::Conflict
            } else {
                OrderLockOutcome::ClaimedElsewhere
            };
            status_list.push(OrderLockEntry::new(order.order_id.clone(), outcome));
        }

        let parked = status_list.iter().filter(|entry| entry.held_by_batch()).count();
        log_lock!(warn, "ORDERS_CONFLICT", driver_id: request.driver_id, orders: request.orders.len(), parked: parked);
        Ok(UpdateOrdersStatusResponse {
            status: BatchUpdateStatus::AnyConflict,
            status_list,
        })
    }

    /// NEW to ASSIGNED, or an existing claim by the same holder on replay
    async fn claim_order(&self, order_id: &str, holder: &str) -> Result<bool> {
        if self
            .orders
            .compare_and_set_status(order_id, OrderStatus::New, OrderStatus::Assigned, Some(holder))
            .await?
        {
            return Ok(true);
        }
        Ok(self.orders.get(order_id).await?.is_some_and(|record| {
            record.status == OrderStatus::Assigned && record.holder.as_deref() == Some(holder)
        }))
    }

    /// Release the driver lock. Releasing a lock that is already gone is a
    /// successful no-op and returns false.
    #[instrument(skip(self, request), fields(driver_id = %request.driver_id, execution_id = %request.execution_id))]
    pub async fn release_driver_lock(&self, request: &ReleaseDriverLockRequest) -> Result<bool> {
        let holder = holder_token(&request.execution_id);
        let released = self.locks.release(&request.driver_id, &holder).await?;
        log_lock!(info, "RELEASED", driver_id: request.driver_id, holder: holder, was_held: released);
        Ok(released)
    }

    /// Move orders this holder claimed from ASSIGNED to CONFLICT
    ///
    /// Used when a sub-saga abandons claims it never committed. Orders held by
    /// another execution, or not `ASSIGNED`, are left alone.
    pub async fn park_orders(&self, holder: &str, order_ids: &[OrderId]) -> Result<Vec<OrderId>> {
        let mut parked = Vec::new();
        for order_id in order_ids {
            if !self.held_by(order_id, holder, OrderStatus::Assigned).await? {
                continue;
            }
            if self
                .orders
                .compare_and_set_status(order_id, OrderStatus::Assigned, OrderStatus::Conflict, Some(holder))
                .await?
            {
                parked.push(order_id.clone());
            }
        }
        if !parked.is_empty() {
            log_lock!(warn, "ORDERS_PARKED", holder: holder, parked: parked.len());
        }
        Ok(parked)
    }

    /// Only the claiming holder ever moves an order out of ASSIGNED or CONFLICT
    async fn held_by(&self, order_id: &str, holder: &str, status: OrderStatus) -> Result<bool> {
        Ok(self
            .orders
            .get(order_id)
            .await?
            .is_some_and(|record| record.status == status && record.holder.as_deref() == Some(holder)))
    }

    /// Return this batch's orders to NEW
    ///
    /// Entries marked as held by the batch are first parked if still
    /// `ASSIGNED`, then moved CONFLICT to NEW. Orders parked by another
    /// execution stay with it.
    #[instrument(skip(self, request), fields(driver_id = %request.driver_id, execution_id = %request.execution_id))]
    pub async fn release_orders_lock(&self, request: &ReleaseOrdersLockRequest) -> Result<Vec<OrderId>> {
        let holder = holder_token(&request.execution_id);
        let held: Vec<OrderId> = request
            .order_status_list
            .iter()
            .filter(|entry| entry.held_by_batch())
            .map(|entry| entry.order_id.clone())
            .collect();
        self.park_orders(&holder, &held).await?;

        let mut released = Vec::new();
        for order_id in held {
            if !self.held_by(&order_id, &holder, OrderStatus::Conflict).await? {
                continue;
            }
            if self
                .orders
                .compare_and_set_status(&order_id, OrderStatus::Conflict, OrderStatus::New, None)
                .await?
            {
                released.push(order_id);
            }
        }
        log_lock!(info, "ORDERS_RELEASED", driver_id: request.driver_id, released: released.len());
        Ok(released)
    }

    /// Move NEW orders to CANCELLED; orders already past NEW are skipped
    #[instrument(skip(self, orders), fields(orders = orders.len()))]
    pub async fn cancel_orders(&self, orders: &[Order]) -> Result<Vec<OrderId>> {
        let mut cancelled = Vec::with_capacity(orders.len());
        for order in orders {
            if self
                .orders
                .compare_and_set_status(&order.order_id, OrderStatus::New, OrderStatus::Cancelled, None)
                .await?
            {
                cancelled.push(order.order_id.clone());
            }
        }
        log_lock!(info, "ORDERS_CANCELLED", requested: orders.len(), cancelled: cancelled.len());
        Ok(cancelled)
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("lock_ttl", &self.lock_ttl)
            .finish()
    }
}
