//! # Database Migration System
//!
//! Migrations are embedded at compile time from `migrations/` and applied in
//! version order. Applied versions are tracked in
//! `dispatch_schema_migrations`; a Postgres advisory lock serializes
//! concurrent runners so parallel test processes and replicas do not race.

use sqlx::{PgPool, Row};
use std::collections::HashSet;
use tracing::{debug, info};

/// Advisory lock key for schema initialization
const MIGRATION_LOCK_KEY: i64 = 7_341_905_221_004_118;

/// A single embedded migration
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: &'static str,
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "20260101000001",
        name: "create_dispatch_tables",
        sql: include_str!("../../migrations/20260101000001_create_dispatch_tables.sql"),
    },
    Migration {
        version: "20260101000002",
        name: "create_saga_transitions",
        sql: include_str!("../../migrations/20260101000002_create_saga_transitions.sql"),
    },
];

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    pub fn all() -> &'static [Migration] {
        MIGRATIONS
    }

    /// Apply every outstanding migration
    pub async fn run_all(pool: &PgPool) -> Result<(), sqlx::Error> {
        // Session-level advisory locks belong to a connection, so hold one
        let mut conn = pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::run_outstanding(&mut conn).await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn run_outstanding(conn: &mut sqlx::PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dispatch_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        let applied: HashSet<String> = sqlx::query("SELECT version FROM dispatch_schema_migrations")
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect();

        for migration in MIGRATIONS {
            if applied.contains(migration.version) {
                debug!(version = migration.version, "Migration already applied");
                continue;
            }

            sqlx::raw_sql(migration.sql).execute(&mut *conn).await?;
            sqlx::query("INSERT INTO dispatch_schema_migrations (version) VALUES ($1)")
                .bind(migration.version)
                .execute(&mut *conn)
                .await?;

            info!(
                version = migration.version,
                name = migration.name,
                "Applied migration"
            );
        }

        Ok(())
    }
}
