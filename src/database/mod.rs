//! # Database Operations
//!
//! Postgres connection pooling and schema migrations for the durable stores.
//! Only compiled with the `postgres` feature.
//!
//! ```rust,no_run
//! use dispatch_core::config::DatabaseConfig;
//! use dispatch_core::database::{DatabaseConnection, DatabaseMigrations};
//!
//! # async fn example() -> Result<(), sqlx::Error> {
//! let connection = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! DatabaseMigrations::run_all(connection.pool()).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::{DatabaseConnection, SchemaHealth, DISPATCH_TABLES};
pub use migrations::{DatabaseMigrations, Migration};
