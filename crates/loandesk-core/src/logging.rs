//! Structured logging field name constants for loandesk.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue (retry scheduled, handler failed) |
//! | INFO  | Lifecycle events (job accepted, job terminal, eviction) |
//! | DEBUG | Decision points (dispatch, slot acquisition, config) |
//! | TRACE | Per-event, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated from an HTTP request.
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "jobs", "events"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "scheduler", "executor", "sweeper", "publisher"
pub const COMPONENT: &str = "component";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

/// Document identifier of a work item.
pub const DOCUMENT_ID: &str = "document_id";

/// Index of a work item within its job.
pub const ITEM_INDEX: &str = "item_index";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Attempt number of an analysis call (1-based).
pub const ATTEMPT: &str = "attempt";

/// Number of documents in a job.
pub const DOCUMENT_COUNT: &str = "document_count";

/// Number of currently active worker slots.
pub const ACTIVE_WORKERS: &str = "active_workers";

/// Number of jobs removed by a sweep.
pub const EVICTED_COUNT: &str = "evicted_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Terminal status reached by a job or item.
pub const STATUS: &str = "status";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
