//! Test data builders

use chrono::{Duration, Utc};
use dispatch_core::models::{Assignment, Cluster, Coordinates, DispatchSolution, Order};

/// An order that stays valid for an hour
pub fn order(id: &str) -> Order {
    let now = Utc::now();
    Order::new(
        id,
        Coordinates::new(40.71, -74.00),
        Coordinates::new(40.73, -73.99),
        now - Duration::minutes(5),
        now + Duration::hours(1),
    )
}

/// An order whose deadline has already passed
pub fn expired_order(id: &str) -> Order {
    let now = Utc::now();
    Order::new(
        id,
        Coordinates::new(40.71, -74.00),
        Coordinates::new(40.73, -73.99),
        now - Duration::hours(2),
        now - Duration::minutes(1),
    )
}

pub fn orders(ids: &[&str]) -> Vec<Order> {
    ids.iter().map(|id| order(id)).collect()
}

pub fn cluster(ids: &[&str]) -> Cluster {
    Cluster::new(Coordinates::new(40.72, -74.00), orders(ids))
}

pub fn assignment(driver_id: &str, ids: &[&str]) -> Assignment {
    Assignment {
        driver_id: driver_id.to_string(),
        driver_identity: format!("Driver {driver_id}"),
        driver_location: Coordinates::new(40.70, -74.01),
        orders: orders(ids),
    }
}

/// Builder for the solution a scripted solver hands back
#[derive(Debug, Clone, Default)]
pub struct SolutionBuilder {
    solution: DispatchSolution,
}

impl SolutionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unassigned(mut self, ids: &[&str]) -> Self {
        self.solution.unassigned.extend(orders(ids));
        self
    }

    pub fn assign(mut self, driver_id: &str, ids: &[&str]) -> Self {
        self.solution.assigned.push(assignment(driver_id, ids));
        self
    }

    pub fn build(self) -> DispatchSolution {
        self.solution
    }
}
