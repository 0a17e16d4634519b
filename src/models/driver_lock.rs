use super::dispatch_problem::DriverId;
use super::order::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exclusive, time-bounded reservation of a driver by one saga execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLock {
    pub driver_id: DriverId,
    /// Holder token: the owning execution plus assignment scope
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub released: bool,
}

impl DriverLock {
    /// Unreleased and inside its TTL
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        !self.released && now < self.expires_at
    }

    pub fn is_held_by(&self, holder: &str, now: DateTime<Utc>) -> bool {
        self.holder == holder && self.is_held(now)
    }
}

/// Per-order result of a batch status update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderLockOutcome {
    /// Moved NEW to ASSIGNED under this driver
    Assigned,
    /// Taken (or possibly taken) by this batch and not committed; must be
    /// released
    Conflict,
    /// Claimed by another assignment (or no longer NEW); never touched
    ClaimedElsewhere,
}

/// One row of the `statusList` returned by `updateOrdersStatus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLockEntry {
    pub order_id: OrderId,
    pub outcome: OrderLockOutcome,
}

impl OrderLockEntry {
    pub fn new(order_id: impl Into<OrderId>, outcome: OrderLockOutcome) -> Self {
        Self {
            order_id: order_id.into(),
            outcome,
        }
    }

    /// Whether this batch holds the order and must hand it back on release
    pub fn held_by_batch(&self) -> bool {
        matches!(self.outcome, OrderLockOutcome::Conflict)
    }
}
