use chrono::{DateTime, Duration, TimeZone, Utc};
use dispatch_core::models::{Assignment, Coordinates, DispatchSolution, Order};
use proptest::prelude::*;

/// Fixed reference instant so shrinking is deterministic
pub fn reference_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

/// Orders with unique ids whose deadlines straddle `reference_now()`
pub fn order_batch_strategy() -> impl Strategy<Value = Vec<Order>> {
    prop::collection::vec(-3_600i64..3_600, 0..40).prop_map(|offsets| {
        let now = reference_now();
        offsets
            .into_iter()
            .enumerate()
            .map(|(i, offset)| {
                Order::new(
                    format!("order-{i}"),
                    Coordinates::new(40.0, -73.0),
                    Coordinates::new(40.1, -73.1),
                    now - Duration::hours(2),
                    now + Duration::seconds(offset),
                )
            })
            .collect()
    })
}

/// A batch plus a valid solver partition of it: each order goes to a
/// random driver bucket or to the unassigned list
pub fn partitioned_solution_strategy() -> impl Strategy<Value = (Vec<Order>, DispatchSolution)> {
    order_batch_strategy().prop_flat_map(|orders| {
        let buckets = prop::collection::vec(0usize..5, orders.len());
        (Just(orders), buckets)
    })
    .prop_map(|(orders, buckets)| {
        let mut solution = DispatchSolution::default();
        let mut drivers: Vec<Vec<Order>> = vec![Vec::new(); 4];
        for (order, bucket) in orders.iter().zip(buckets) {
            match bucket {
                0 => solution.unassigned.push(order.clone()),
                n => drivers[n - 1].push(order.clone()),
            }
        }
        solution.assigned = drivers
            .into_iter()
            .enumerate()
            .filter(|(_, batch)| !batch.is_empty())
            .map(|(i, batch)| Assignment {
                driver_id: format!("driver-{i}"),
                driver_identity: format!("Driver {i}"),
                driver_location: Coordinates::new(40.0, -73.0),
                orders: batch,
            })
            .collect();
        (orders, solution)
    })
}

/// Retry budgets within the ranges configuration validation accepts
pub fn retry_budget_strategy() -> impl Strategy<Value = (u32, u64, f64, u64)> {
    (1u32..10, 1u64..1_000, 1.0f64..4.0, 1u64..60_000)
}
