//! # Locking
//!
//! Driver locks and order status claims behind an optimistic-concurrency
//! store interface, the [`LockManager`] that implements the lock commands on
//! top of it, and the handlers that expose those commands to the invoker.

pub mod handlers;
pub mod lock_manager;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

pub use handlers::{register_lock_handlers, LockCommandHandler, LOCK_COMMANDS};
pub use lock_manager::{holder_token, LockManager};
pub use memory::InMemoryDispatchStore;
#[cfg(feature = "postgres")]
pub use postgres::PgDispatchStore;
pub use store::{DispatchStore, DriverLockStore, OrderRecord, OrderStatusStore};
