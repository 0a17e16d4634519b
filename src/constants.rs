//! # System Constants
//!
//! Core enums and event names that define the operational vocabulary of the
//! dispatch saga: order statuses, batch update outcomes, and the lifecycle
//! event names published on the event bus.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle events published by the orchestration layer
pub mod events {
    // Coordinator events
    pub const ORDERS_FILTERED: &str = "coordinator.orders_filtered";
    pub const ORDERS_CANCELLED: &str = "coordinator.orders_cancelled";
    pub const CLUSTERS_FORMED: &str = "coordinator.clusters_formed";

    // Cluster saga events
    pub const CLUSTER_STARTED: &str = "cluster.started";
    pub const CLUSTER_SUBMITTED: &str = "cluster.submitted";
    pub const CLUSTER_SOLVED: &str = "cluster.solved";
    pub const CLUSTER_DONE: &str = "cluster.done";
    pub const CLUSTER_FAILED: &str = "cluster.failed";

    // Assignment sub-saga events
    pub const ASSIGNMENT_COMMITTED: &str = "assignment.committed";
    pub const ASSIGNMENT_RECYCLED: &str = "assignment.recycled";
    pub const ASSIGNMENT_FAILED: &str = "assignment.failed";
    pub const COMPENSATION_FAILED: &str = "assignment.compensation_failed";

    // Unassigned order events
    pub const ORDER_REPUBLISHED: &str = "order.republished";
    pub const ORDER_REPUBLISH_FAILED: &str = "order.republish_failed";
}

/// Finished execution results a runtime keeps until someone collects them
pub const DEFAULT_RESULT_RETENTION: usize = 256;

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Waiting for dispatch
    #[default]
    New,
    /// Committed to a driver
    Assigned,
    /// Held by an assignment batch that lost a race; awaiting release
    Conflict,
    /// Expired before it could be dispatched
    Cancelled,
    /// Delivered (set downstream)
    Delivered,
}

impl OrderStatus {
    /// Terminal statuses never re-enter dispatch
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Delivered)
    }

    /// Only NEW orders may be claimed by an assignment
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::New)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Assigned => "ASSIGNED",
            Self::Conflict => "CONFLICT",
            Self::Cancelled => "CANCELLED",
            Self::Delivered => "DELIVERED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "ASSIGNED" => Ok(Self::Assigned),
            "CONFLICT" => Ok(Self::Conflict),
            "CANCELLED" => Ok(Self::Cancelled),
            "DELIVERED" => Ok(Self::Delivered),
            _ => Err(format!("Invalid order status: {s}")),
        }
    }
}

/// Outcome of a batch order status update
///
/// The batch is all-or-nothing: a single order claimed elsewhere turns the
/// whole batch into `AnyConflict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchUpdateStatus {
    AllAssigned,
    AnyConflict,
}

impl fmt::Display for BatchUpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllAssigned => write!(f, "ALL_ASSIGNED"),
            Self::AnyConflict => write!(f, "ANY_CONFLICT"),
        }
    }
}
