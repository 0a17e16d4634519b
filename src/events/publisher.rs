use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::constants::events;
use crate::models::{DriverId, OrderId};

/// Observable milestones of a dispatch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchLifecycleEvent {
    OrdersFiltered {
        batch_id: Uuid,
        valid: usize,
        expired: usize,
    },
    OrdersCancelled {
        batch_id: Uuid,
        cancelled: Vec<OrderId>,
    },
    ClustersFormed {
        batch_id: Uuid,
        clusters: usize,
    },
    ClusterStarted {
        execution_id: Uuid,
        orders: usize,
    },
    ClusterSubmitted {
        execution_id: Uuid,
        problem_id: String,
    },
    ClusterSolved {
        execution_id: Uuid,
        problem_id: String,
        assigned: usize,
        unassigned: usize,
        polls: u32,
    },
    ClusterDone {
        execution_id: Uuid,
        committed: usize,
        recycled: usize,
        failed: usize,
    },
    ClusterFailed {
        execution_id: Uuid,
        reason: String,
    },
    AssignmentCommitted {
        execution_id: Uuid,
        driver_id: DriverId,
        orders: Vec<OrderId>,
    },
    AssignmentRecycled {
        execution_id: Uuid,
        driver_id: DriverId,
        orders: Vec<OrderId>,
        released: Option<Vec<OrderId>>,
    },
    AssignmentFailed {
        execution_id: Uuid,
        driver_id: DriverId,
        reason: String,
    },
    CompensationFailed {
        execution_id: Uuid,
        driver_id: DriverId,
        reason: String,
    },
    OrderRepublished {
        execution_id: Uuid,
        order_id: OrderId,
    },
    OrderRepublishFailed {
        execution_id: Uuid,
        order_id: OrderId,
        reason: String,
    },
}

impl DispatchLifecycleEvent {
    /// Dotted event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrdersFiltered { .. } => events::ORDERS_FILTERED,
            Self::OrdersCancelled { .. } => events::ORDERS_CANCELLED,
            Self::ClustersFormed { .. } => events::CLUSTERS_FORMED,
            Self::ClusterStarted { .. } => events::CLUSTER_STARTED,
            Self::ClusterSubmitted { .. } => events::CLUSTER_SUBMITTED,
            Self::ClusterSolved { .. } => events::CLUSTER_SOLVED,
            Self::ClusterDone { .. } => events::CLUSTER_DONE,
            Self::ClusterFailed { .. } => events::CLUSTER_FAILED,
            Self::AssignmentCommitted { .. } => events::ASSIGNMENT_COMMITTED,
            Self::AssignmentRecycled { .. } => events::ASSIGNMENT_RECYCLED,
            Self::AssignmentFailed { .. } => events::ASSIGNMENT_FAILED,
            Self::CompensationFailed { .. } => events::COMPENSATION_FAILED,
            Self::OrderRepublished { .. } => events::ORDER_REPUBLISHED,
            Self::OrderRepublishFailed { .. } => events::ORDER_REPUBLISH_FAILED,
        }
    }

    /// Owning cluster execution, when the event belongs to one
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            Self::OrdersFiltered { .. } | Self::OrdersCancelled { .. } | Self::ClustersFormed { .. } => {
                None
            }
            Self::ClusterStarted { execution_id, .. }
            | Self::ClusterSubmitted { execution_id, .. }
            | Self::ClusterSolved { execution_id, .. }
            | Self::ClusterDone { execution_id, .. }
            | Self::ClusterFailed { execution_id, .. }
            | Self::AssignmentCommitted { execution_id, .. }
            | Self::AssignmentRecycled { execution_id, .. }
            | Self::AssignmentFailed { execution_id, .. }
            | Self::CompensationFailed { execution_id, .. }
            | Self::OrderRepublished { execution_id, .. }
            | Self::OrderRepublishFailed { execution_id, .. } => Some(*execution_id),
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: DispatchLifecycleEvent,
    pub published_at: DateTime<Utc>,
}

/// Broadcast publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: DispatchLifecycleEvent) {
        tracing::trace!(event = event.name(), "Publishing lifecycle event");
        let _ = self.sender.send(PublishedEvent {
            event,
            published_at: Utc::now(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
