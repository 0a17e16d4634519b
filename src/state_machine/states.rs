use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{DispatchSolution, OrderId, OrderLockEntry};

/// A checkpointable saga state
pub trait SagaState: Serialize + DeserializeOwned + fmt::Display + Clone + Send + Sync {
    /// Terminal states accept no further events
    fn is_terminal(&self) -> bool;
}

/// Cluster-level dispatch saga state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchState {
    /// Problem not yet accepted by the solver
    Submitting,
    /// Problem accepted; `polls` counts completed in-progress queries
    Polling { problem_id: String, polls: u32 },
    /// Solver finished with a validated solution
    Solved {
        problem_id: String,
        solution: DispatchSolution,
    },
    /// Branch fan-out in flight
    FanningOut {
        problem_id: String,
        solution: DispatchSolution,
    },
    Done,
    Failed { reason: String },
}

impl DispatchState {
    pub fn problem_id(&self) -> Option<&str> {
        match self {
            Self::Polling { problem_id, .. }
            | Self::Solved { problem_id, .. }
            | Self::FanningOut { problem_id, .. } => Some(problem_id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitting => "submitting",
            Self::Polling { .. } => "polling",
            Self::Solved { .. } => "solved",
            Self::FanningOut { .. } => "fanning_out",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

impl Default for DispatchState {
    fn default() -> Self {
        Self::Submitting
    }
}

impl SagaState for DispatchState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-assignment sub-saga state
///
/// The compensation chain is `AnyConflict -> LockReleased -> OrdersReleased
/// -> Recycled`. `Aborting` releases a lock whose acquisition outcome is
/// unknown, then recycles the untouched orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssignmentState {
    Locking,
    /// No lock held and no order touched; orders go back untouched
    LockFailed,
    Locked,
    Updating,
    /// Every order claimed; driver not yet notified
    AllAssigned,
    AnyConflict { status_list: Vec<OrderLockEntry> },
    LockReleased { status_list: Vec<OrderLockEntry> },
    OrdersReleased { released: Vec<OrderId> },
    /// Driver notified of the confirmed batch
    Committed,
    /// Orders republished; `released` is `None` when no order was touched
    Recycled { released: Option<Vec<OrderId>> },
    /// `lockDriver` failed after its retries; the lock may still be held
    Aborting { reason: String },
    Failed { reason: String },
    /// Release retries exhausted; parked until recovery resumes `resume_from`
    CompensationFailed {
        resume_from: Box<AssignmentState>,
        reason: String,
    },
}

impl AssignmentState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Locking => "locking",
            Self::LockFailed => "lock_failed",
            Self::Locked => "locked",
            Self::Updating => "updating",
            Self::AllAssigned => "all_assigned",
            Self::AnyConflict { .. } => "any_conflict",
            Self::LockReleased { .. } => "lock_released",
            Self::OrdersReleased { .. } => "orders_released",
            Self::Committed => "committed",
            Self::Recycled { .. } => "recycled",
            Self::Aborting { .. } => "aborting",
            Self::Failed { .. } => "failed",
            Self::CompensationFailed { .. } => "compensation_failed",
        }
    }

    /// States from which the driver lock may still be held by this sub-saga
    pub fn may_hold_lock(&self) -> bool {
        matches!(
            self,
            Self::Locked
                | Self::Updating
                | Self::AllAssigned
                | Self::AnyConflict { .. }
                | Self::Aborting { .. }
                | Self::CompensationFailed { .. }
        )
    }
}

impl Default for AssignmentState {
    fn default() -> Self {
        Self::Locking
    }
}

impl SagaState for AssignmentState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed | Self::Recycled { .. } | Self::Failed { .. }
        )
    }
}

impl fmt::Display for AssignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Republish of one unassigned order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RepublishState {
    Published,
    Failed { reason: String },
}

impl SagaState for RepublishState {
    fn is_terminal(&self) -> bool {
        true
    }
}

impl fmt::Display for RepublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Published => write!(f, "published"),
            Self::Failed { .. } => write!(f, "failed"),
        }
    }
}
