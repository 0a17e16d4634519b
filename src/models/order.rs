use crate::constants::OrderStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order identity as issued by upstream ingestion
pub type OrderId = String;

/// WGS84 coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A delivery order entering the dispatch saga
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    pub origin: Coordinates,
    pub destination: Coordinates,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub status: OrderStatus,
}

impl Order {
    pub fn new(
        order_id: impl Into<OrderId>,
        origin: Coordinates,
        destination: Coordinates,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            origin,
            destination,
            created_at,
            expires_at,
            status: OrderStatus::New,
        }
    }

    /// An order is expired strictly after its deadline
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Pure partition of a batch by expiry deadline, preserving input order
pub fn partition_expired(orders: Vec<Order>, now: DateTime<Utc>) -> (Vec<Order>, Vec<Order>) {
    orders.into_iter().partition(|order| !order.is_expired(now))
}
