//! # Lifecycle Events
//!
//! In-process broadcast of dispatch milestones for observers such as
//! metrics exporters or audit sinks. Publishing never blocks the saga.

pub mod publisher;

pub use publisher::{DispatchLifecycleEvent, EventPublisher, PublishedEvent};
