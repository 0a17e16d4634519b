//! # Resilience Module
//!
//! Retry budgets for transient handler failures. Ordinary steps use the
//! `retry` budget; lock release compensation uses the larger `compensation`
//! budget because a lock that is never released blocks its driver.
//!
//! ```rust,no_run
//! use dispatch_core::config::DispatchConfig;
//! use dispatch_core::resilience::{retry_with_backoff, RetryPolicy};
//! use dispatch_core::error::InvokerError;
//!
//! # async fn example() -> Result<(), InvokerError> {
//! let policy = RetryPolicy::from(&DispatchConfig::default().retry);
//! let value = retry_with_backoff("queryDispatch", &policy, |_attempt| async {
//!     Ok::<_, InvokerError>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod retry;

pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
