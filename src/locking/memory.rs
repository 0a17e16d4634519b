//! In-process dispatch store backed by DashMap
//!
//! Every conditional write runs under the map's per-key entry lock, so the
//! check and the write are atomic with respect to other callers on that key.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

use super::store::{DriverLockStore, OrderRecord, OrderStatusStore};
use crate::constants::OrderStatus;
use crate::error::{DispatchError, Result};
use crate::models::{DriverId, DriverLock, OrderId};

#[derive(Debug, Default)]
pub struct InMemoryDispatchStore {
    locks: DashMap<DriverId, DriverLock>,
    orders: DashMap<OrderId, OrderRecord>,
}

impl InMemoryDispatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drivers whose lock is currently held
    pub fn held_drivers(&self) -> Vec<DriverId> {
        let now = Utc::now();
        self.locks
            .iter()
            .filter(|entry| entry.value().is_held(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Status of an order, `NEW` when never written
    pub fn status_of(&self, order_id: &str) -> OrderStatus {
        self.orders
            .get(order_id)
            .map(|record| record.status)
            .unwrap_or(OrderStatus::New)
    }
}

#[async_trait]
impl DriverLockStore for InMemoryDispatchStore {
    async fn try_acquire(&self, driver_id: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| DispatchError::store("try_acquire", e.to_string()))?;
        let fresh = DriverLock {
            driver_id: driver_id.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
            released: false,
        };

        match self.locks.entry(driver_id.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if existing.is_held_by(holder, now) {
                    Ok(true)
                } else if existing.is_held(now) {
                    Ok(false)
                } else {
                    occupied.insert(fresh);
                    Ok(true)
                }
            }
        }
    }

    async fn release(&self, driver_id: &str, holder: &str) -> Result<bool> {
        match self.locks.get_mut(driver_id) {
            Some(mut lock) if lock.holder == holder && !lock.released => {
                lock.released = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current(&self, driver_id: &str) -> Result<Option<DriverLock>> {
        Ok(self.locks.get(driver_id).map(|lock| lock.clone()))
    }
}

#[async_trait]
impl OrderStatusStore for InMemoryDispatchStore {
    async fn get(&self, order_id: &str) -> Result<Option<OrderRecord>> {
        Ok(self.orders.get(order_id).map(|record| record.clone()))
    }

    async fn upsert(&self, record: OrderRecord) -> Result<()> {
        self.orders.insert(record.order_id.clone(), record);
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        order_id: &str,
        expected: OrderStatus,
        next: OrderStatus,
        holder: Option<&str>,
    ) -> Result<bool> {
        let updated = OrderRecord {
            order_id: order_id.to_string(),
            status: next,
            holder: holder.map(str::to_string),
            updated_at: Utc::now(),
        };

        match self.orders.entry(order_id.to_string()) {
            Entry::Vacant(vacant) if expected == OrderStatus::New => {
                vacant.insert(updated);
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
            Entry::Occupied(mut occupied) if occupied.get().status == expected => {
                occupied.insert(updated);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }
}
