//! Optimistic-concurrency store interfaces
//!
//! Both shared records (the driver lock and the order status) are only ever
//! written conditionally. Two callers racing on the same key always produce
//! exactly one winner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::OrderStatus;
use crate::error::Result;
use crate::models::{DriverLock, OrderId};

/// Persisted status of one order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub status: OrderStatus,
    /// Holder token of the execution that last moved the order, if any
    pub holder: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn new(order_id: impl Into<OrderId>, status: OrderStatus) -> Self {
        Self {
            order_id: order_id.into(),
            status,
            holder: None,
            updated_at: Utc::now(),
        }
    }
}

/// Exclusive, time-bounded driver reservations
#[async_trait]
pub trait DriverLockStore: Send + Sync {
    /// Acquire the lock unless another holder has an unreleased, unexpired one.
    ///
    /// Re-acquiring a lock already held by `holder` succeeds and keeps the
    /// original acquisition time.
    async fn try_acquire(&self, driver_id: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Release the lock if `holder` owns it. Returns false when there was
    /// nothing to release.
    async fn release(&self, driver_id: &str, holder: &str) -> Result<bool>;

    async fn current(&self, driver_id: &str) -> Result<Option<DriverLock>>;
}

/// Per-order status with compare-and-set updates
///
/// An order without a record is treated as `NEW`: orders enter the saga as
/// `NEW` and ingestion is not required to seed the store.
#[async_trait]
pub trait OrderStatusStore: Send + Sync {
    async fn get(&self, order_id: &str) -> Result<Option<OrderRecord>>;

    /// Unconditional write, for ingestion and seeding
    async fn upsert(&self, record: OrderRecord) -> Result<()>;

    /// Move `order_id` from `expected` to `next` and record `holder`.
    /// Returns false, leaving the record untouched, when the current status
    /// differs from `expected`.
    async fn compare_and_set_status(
        &self,
        order_id: &str,
        expected: OrderStatus,
        next: OrderStatus,
        holder: Option<&str>,
    ) -> Result<bool>;
}

/// Convenience bound for stores that serve both concerns
pub trait DispatchStore: DriverLockStore + OrderStatusStore {}

impl<T: DriverLockStore + OrderStatusStore> DispatchStore for T {}
