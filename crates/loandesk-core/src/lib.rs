//! # loandesk-core
//!
//! Core types, events, and defaults for the loandesk document processing queue.
//!
//! This crate provides the data model and event publisher that the scheduler
//! and HTTP surface depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{
    EventEnvelope, EventHandler, EventKind, EventPublisher, JobEvent, JobOutcome, JobProgress,
    SubscriptionId,
};
pub use models::*;
