//! # loandesk-jobs
//!
//! Parallel document processing queue for loandesk.
//!
//! This crate provides:
//! - Bounded per-job (and optionally process-wide) work item concurrency
//! - Per-item retries with configurable backoff
//! - Job-level timeout and cooperative cancellation
//! - Live progress and ETA via the core event publisher
//! - Age-based eviction of finished jobs
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use loandesk_jobs::{EventKind, JobEvent, JobOptions, JobType, NoOpAnalyzer, SchedulerBuilder};
//!
//! let scheduler = SchedulerBuilder::new(Arc::new(NoOpAnalyzer::new())).build();
//!
//! scheduler.events().on(EventKind::Completed, |event: &JobEvent| {
//!     println!("done: {}", event.job_id());
//!     Ok(())
//! })?;
//!
//! let accepted = scheduler.submit(
//!     vec!["doc-1".into(), "doc-2".into()],
//!     JobType::FullAnalysis,
//!     JobOptions::default().with_max_concurrent(2),
//! )?;
//!
//! let sweeper = scheduler.start_sweeper();
//! // ...
//! sweeper.shutdown().await?;
//! ```

pub mod analyzer;
pub mod executor;
pub mod job;
pub mod registry;
pub mod scheduler;
pub mod sweeper;

// Re-export core types
pub use loandesk_core::*;

pub use analyzer::{DocumentAnalyzer, HttpAnalyzer, NoOpAnalyzer};
pub use job::{CancelOutcome, ItemOutcome, Job};
pub use registry::{JobEntry, JobRegistry};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerConfig};
pub use sweeper::{CleanupSweeper, SweeperHandle};
