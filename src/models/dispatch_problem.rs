//! Solver-side records: the submitted problem, the solved partition, and
//! the candidate driver bindings it produces.

use super::cluster::Cluster;
use super::order::{Coordinates, Order, OrderId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Driver identity as known to the fleet system
pub type DriverId = String;

/// Candidate binding of one driver to a non-empty batch of orders
///
/// Ephemeral until the sub-saga commits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub driver_id: DriverId,
    pub driver_identity: String,
    pub driver_location: Coordinates,
    pub orders: Vec<Order>,
}

impl Assignment {
    pub fn order_ids(&self) -> Vec<OrderId> {
        self.orders.iter().map(|o| o.order_id.clone()).collect()
    }

    /// Stable checkpoint scope for this assignment inside one execution
    pub fn scope(&self) -> String {
        format!("assignment:{}", self.driver_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SolverStatus {
    InProgress,
    Solved,
}

/// Solver output once `inProgress` turns false
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchSolution {
    pub unassigned: Vec<Order>,
    pub assigned: Vec<Assignment>,
}

impl DispatchSolution {
    /// Every submitted order must appear exactly once, either unassigned or
    /// in exactly one assignment, and no assignment may be empty.
    pub fn validate_against(&self, submitted: &[Order]) -> Result<(), String> {
        let expected: HashSet<&str> = submitted.iter().map(|o| o.order_id.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::with_capacity(expected.len());

        for assignment in &self.assigned {
            if assignment.orders.is_empty() {
                return Err(format!(
                    "assignment for driver {} has no orders",
                    assignment.driver_id
                ));
            }
        }

        let returned = self
            .unassigned
            .iter()
            .chain(self.assigned.iter().flat_map(|a| a.orders.iter()));
        for order in returned {
            let id = order.order_id.as_str();
            if !expected.contains(id) {
                return Err(format!("order {id} was not part of the submitted cluster"));
            }
            if !seen.insert(id) {
                return Err(format!("order {id} appears more than once in the solution"));
            }
        }

        if seen.len() != expected.len() {
            let mut missing: Vec<&str> = expected.difference(&seen).copied().collect();
            missing.sort_unstable();
            return Err(format!("orders missing from solution: {}", missing.join(", ")));
        }

        let mut drivers = HashSet::with_capacity(self.assigned.len());
        for assignment in &self.assigned {
            if !drivers.insert(assignment.driver_id.as_str()) {
                return Err(format!(
                    "driver {} is bound to more than one assignment",
                    assignment.driver_id
                ));
            }
        }

        Ok(())
    }

    pub fn assigned_order_count(&self) -> usize {
        self.assigned.iter().map(|a| a.orders.len()).sum()
    }
}

/// A cluster submitted to the solver, tracked until solved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchProblem {
    pub problem_id: String,
    pub cluster: Cluster,
    pub status: SolverStatus,
    pub solution: Option<DispatchSolution>,
}

impl DispatchProblem {
    pub fn submitted(problem_id: impl Into<String>, cluster: Cluster) -> Self {
        Self {
            problem_id: problem_id.into(),
            cluster,
            status: SolverStatus::InProgress,
            solution: None,
        }
    }

    pub fn solve(&mut self, solution: DispatchSolution) {
        self.status = SolverStatus::Solved;
        self.solution = Some(solution);
    }
}
