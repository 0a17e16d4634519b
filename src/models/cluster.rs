use super::order::{Coordinates, Order, OrderId};
use serde::{Deserialize, Serialize};

/// Orders grouped around a centroid by the clustering step
///
/// Transient: lives only for the orchestration run it seeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub centroid: Coordinates,
    pub orders: Vec<Order>,
}

impl Cluster {
    pub fn new(centroid: Coordinates, orders: Vec<Order>) -> Self {
        Self { centroid, orders }
    }

    pub fn order_ids(&self) -> Vec<OrderId> {
        self.orders.iter().map(|o| o.order_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
