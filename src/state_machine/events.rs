use serde::{Deserialize, Serialize};

use crate::models::{DispatchSolution, OrderId, OrderLockEntry};

/// Events driving the cluster-level saga
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    Submitted { problem_id: String },
    StillInProgress,
    Solved { solution: DispatchSolution },
    StartFanOut,
    FanOutCompleted,
    Fail { reason: String },
}

impl DispatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::StillInProgress => "still_in_progress",
            Self::Solved { .. } => "solved",
            Self::StartFanOut => "start_fan_out",
            Self::FanOutCompleted => "fan_out_completed",
            Self::Fail { .. } => "fail",
        }
    }
}

/// Events driving one assignment sub-saga
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AssignmentEvent {
    LockAcquired,
    LockRejected,
    BeginUpdate,
    OrdersAssigned,
    OrdersConflicted { status_list: Vec<OrderLockEntry> },
    DriverNotified,
    DriverLockReleased,
    OrderLocksReleased { released: Vec<OrderId> },
    OrdersRecycled,
    StepFailed { reason: String },
    /// A step failed while claims may be held; every listed order is handed back
    ClaimsAbandoned {
        reason: String,
        status_list: Vec<OrderLockEntry>,
    },
    CompensationExhausted { reason: String },
    /// Recovery picks a parked compensation back up
    ResumeCompensation,
}

impl AssignmentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LockAcquired => "lock_acquired",
            Self::LockRejected => "lock_rejected",
            Self::BeginUpdate => "begin_update",
            Self::OrdersAssigned => "orders_assigned",
            Self::OrdersConflicted { .. } => "orders_conflicted",
            Self::DriverNotified => "driver_notified",
            Self::DriverLockReleased => "driver_lock_released",
            Self::OrderLocksReleased { .. } => "order_locks_released",
            Self::OrdersRecycled => "orders_recycled",
            Self::StepFailed { .. } => "step_failed",
            Self::ClaimsAbandoned { .. } => "claims_abandoned",
            Self::CompensationExhausted { .. } => "compensation_exhausted",
            Self::ResumeCompensation => "resume_compensation",
        }
    }
}
