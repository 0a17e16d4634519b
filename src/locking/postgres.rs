//! Postgres-backed dispatch store
//!
//! Conditional writes are single statements: the `WHERE` clause on the
//! upsert or update is the compare step, and `rows_affected()` tells the
//! caller whether it won.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;

use super::store::{DriverLockStore, OrderRecord, OrderStatusStore};
use crate::constants::OrderStatus;
use crate::error::{DispatchError, Result};
use crate::models::DriverLock;

#[derive(Debug, Clone)]
pub struct PgDispatchStore {
    pool: PgPool,
}

impl PgDispatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DriverLockStore for PgDispatchStore {
    async fn try_acquire(&self, driver_id: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|e| DispatchError::store("try_acquire", e.to_string()))?;

        // Same-holder reacquire keeps the original acquisition
        let result = sqlx::query(
            r#"
            INSERT INTO dispatch_driver_locks (driver_id, holder, acquired_at, expires_at, released)
            VALUES ($1, $2, $3, $4, false)
            ON CONFLICT (driver_id) DO UPDATE
            SET holder = EXCLUDED.holder,
                acquired_at = CASE WHEN dispatch_driver_locks.holder = EXCLUDED.holder
                                    AND NOT dispatch_driver_locks.released
                                    AND dispatch_driver_locks.expires_at > $3
                                   THEN dispatch_driver_locks.acquired_at
                                   ELSE EXCLUDED.acquired_at END,
                expires_at = CASE WHEN dispatch_driver_locks.holder = EXCLUDED.holder
                                   AND NOT dispatch_driver_locks.released
                                   AND dispatch_driver_locks.expires_at > $3
                                  THEN dispatch_driver_locks.expires_at
                                  ELSE EXCLUDED.expires_at END,
                released = false
            WHERE dispatch_driver_locks.released
               OR dispatch_driver_locks.expires_at <= $3
               OR dispatch_driver_locks.holder = EXCLUDED.holder
            "#,
        )
        .bind(driver_id)
        .bind(holder)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, driver_id: &str, holder: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_driver_locks
            SET released = true
            WHERE driver_id = $1 AND holder = $2 AND NOT released
            "#,
        )
        .bind(driver_id)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn current(&self, driver_id: &str) -> Result<Option<DriverLock>> {
        let row = sqlx::query(
            r#"
            SELECT driver_id, holder, acquired_at, expires_at, released
            FROM dispatch_driver_locks
            WHERE driver_id = $1
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<DriverLock> {
            Ok(DriverLock {
                driver_id: row.try_get("driver_id")?,
                holder: row.try_get("holder")?,
                acquired_at: row.try_get::<DateTime<Utc>, _>("acquired_at")?,
                expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
                released: row.try_get("released")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl OrderStatusStore for PgDispatchStore {
    async fn get(&self, order_id: &str) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, status, holder, updated_at
            FROM dispatch_order_status
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<OrderRecord> {
            let status: String = row.try_get("status")?;
            Ok(OrderRecord {
                order_id: row.try_get("order_id")?,
                status: status
                    .parse()
                    .map_err(|e: String| DispatchError::store("get_order", e))?,
                holder: row.try_get("holder")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn upsert(&self, record: OrderRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dispatch_order_status (order_id, status, holder, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_id) DO UPDATE
            SET status = EXCLUDED.status,
                holder = EXCLUDED.holder,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.order_id)
        .bind(record.status.as_str())
        .bind(&record.holder)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        order_id: &str,
        expected: OrderStatus,
        next: OrderStatus,
        holder: Option<&str>,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = if expected == OrderStatus::New {
            // A missing row is an order that has never left NEW
            sqlx::query(
                r#"
                INSERT INTO dispatch_order_status (order_id, status, holder, updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (order_id) DO UPDATE
                SET status = EXCLUDED.status,
                    holder = EXCLUDED.holder,
                    updated_at = EXCLUDED.updated_at
                WHERE dispatch_order_status.status = $5
                "#,
            )
            .bind(order_id)
            .bind(next.as_str())
            .bind(holder)
            .bind(now)
            .bind(expected.as_str())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE dispatch_order_status
                SET status = $2, holder = $3, updated_at = $4
                WHERE order_id = $1 AND status = $5
                "#,
            )
            .bind(order_id)
            .bind(next.as_str())
            .bind(holder)
            .bind(now)
            .bind(expected.as_str())
            .execute(&self.pool)
            .await?
        };

        Ok(result.rows_affected() == 1)
    }
}
