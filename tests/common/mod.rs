//! Shared integration test infrastructure: data builders, an in-memory
//! runtime harness with scriptable external handlers, and proptest
//! strategies.

#![allow(dead_code)] // Each test binary uses a different subset

pub mod builders;
pub mod harness;
pub mod strategies;

pub use builders::*;
pub use harness::*;
