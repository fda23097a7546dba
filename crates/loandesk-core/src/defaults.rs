//! Centralized default constants for the loandesk queue.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic numbers.

// =============================================================================
// JOB OPTIONS
// =============================================================================

/// Default number of work items a single job may run at once.
pub const JOB_MAX_CONCURRENT: usize = 5;

/// Default job wall-clock budget in milliseconds (5 minutes), measured from job start.
pub const JOB_TIMEOUT_MS: u64 = 300_000;

/// Default number of retries after a failed analysis attempt.
pub const JOB_RETRY_ATTEMPTS: u32 = 2;

/// Default base retry delay in milliseconds.
pub const JOB_RETRY_DELAY_MS: u64 = 2_000;

/// Upper bound accepted for `maxConcurrent` in submitted options.
pub const JOB_MAX_CONCURRENT_CAP: usize = 50;

/// Upper bound accepted for `retryAttempts` in submitted options.
pub const JOB_RETRY_ATTEMPTS_CAP: u32 = 10;

// =============================================================================
// SUBMISSION
// =============================================================================

/// Maximum documents per submitted job.
pub const BATCH_MAX_DOCUMENTS: usize = 50;

// =============================================================================
// RETENTION
// =============================================================================

/// How long a terminal job stays queryable after `finished_at` (24 hours).
pub const JOB_RETENTION_SECS: u64 = 24 * 60 * 60;

/// How often the cleanup sweeper runs (1 hour).
pub const SWEEP_INTERVAL_SECS: u64 = 60 * 60;

// =============================================================================
// EVENTS
// =============================================================================

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Maximum number of synchronous event handlers registered at once.
pub const EVENT_MAX_HANDLERS: usize = 64;

// =============================================================================
// ANALYSIS BACKEND
// =============================================================================

/// Timeout for a single remote analysis request in seconds.
pub const ANALYSIS_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default SSE keep-alive interval in seconds.
pub const SSE_KEEP_ALIVE_SECS: u64 = 15;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_option_defaults() {
        assert_eq!(JOB_MAX_CONCURRENT, 5);
        assert_eq!(JOB_TIMEOUT_MS, 300_000);
        assert_eq!(JOB_RETRY_ATTEMPTS, 2);
        assert_eq!(JOB_RETRY_DELAY_MS, 2_000);
    }

    #[test]
    fn test_caps_cover_defaults() {
        assert!(JOB_MAX_CONCURRENT <= JOB_MAX_CONCURRENT_CAP);
        assert!(JOB_RETRY_ATTEMPTS <= JOB_RETRY_ATTEMPTS_CAP);
    }

    #[test]
    fn test_sweep_runs_more_often_than_retention() {
        assert!(SWEEP_INTERVAL_SECS < JOB_RETENTION_SECS);
    }
}
