use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;

/// Tables the durable stores read and write; created by the bundled migrations.
pub const DISPATCH_TABLES: [&str; 4] = [
    "dispatch_driver_locks",
    "dispatch_order_status",
    "dispatch_saga_transitions",
    "dispatch_executions",
];

/// Readiness of the dispatch schema behind a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaHealth {
    /// Dispatch tables not present in the current search path
    pub missing_tables: Vec<String>,
}

impl SchemaHealth {
    pub fn is_ready(&self) -> bool {
        self.missing_tables.is_empty()
    }
}

pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Database pool connected");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check that the lock, order-status and checkpoint tables exist.
    ///
    /// A connection failure is an `Err`; an unmigrated database is an `Ok`
    /// with the missing tables listed.
    pub async fn health_check(&self) -> Result<SchemaHealth, sqlx::Error> {
        let mut missing_tables = Vec::new();
        for table in DISPATCH_TABLES {
            let present: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
            if present.is_none() {
                missing_tables.push(table.to_string());
            }
        }

        let health = SchemaHealth { missing_tables };
        if health.is_ready() {
            debug!("Dispatch schema ready");
        } else {
            warn!(missing = ?health.missing_tables, "Dispatch schema incomplete; run migrations");
        }
        Ok(health)
    }
}
