//! # Dispatch Data Model
//!
//! Orders, clusters, solver problems and solutions, driver locks.

pub mod cluster;
pub mod dispatch_problem;
pub mod driver_lock;
pub mod order;

pub use cluster::Cluster;
pub use dispatch_problem::{Assignment, DispatchProblem, DispatchSolution, DriverId, SolverStatus};
pub use driver_lock::{DriverLock, OrderLockEntry, OrderLockOutcome};
pub use order::{partition_expired, Coordinates, Order, OrderId};
