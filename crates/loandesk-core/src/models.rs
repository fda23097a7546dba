//! Data model for document processing jobs.
//!
//! Wire-facing types serialize with camelCase field names to match the
//! submission/status contract consumed by the CRM front end.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

/// Opaque external identifier of an uploaded document.
pub type DocumentId = String;

// =============================================================================
// JOB TYPE
// =============================================================================

/// Which analysis operation a job runs for each of its documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Quality scoring, extraction, and anomaly detection.
    FullAnalysis,
    /// Quality scoring only.
    QualityOnly,
    /// Field extraction only.
    ExtractionOnly,
    /// Batch analysis across an application's document set.
    Batch,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::FullAnalysis,
        JobType::QualityOnly,
        JobType::ExtractionOnly,
        JobType::Batch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FullAnalysis => "full_analysis",
            JobType::QualityOnly => "quality_only",
            JobType::ExtractionOnly => "extraction_only",
            JobType::Batch => "batch",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "full_analysis" | "full" => Ok(JobType::FullAnalysis),
            "quality_only" | "quality" => Ok(JobType::QualityOnly),
            "extraction_only" | "extraction" => Ok(JobType::ExtractionOnly),
            "batch" => Ok(JobType::Batch),
            other => Err(Error::InvalidInput(format!("Unknown job type: '{}'", other))),
        }
    }
}

// =============================================================================
// STATUSES
// =============================================================================

/// Job-level status.
///
/// `Pending -> Processing -> {Completed | Failed | TimedOut | Cancelled}`; a job
/// that never started may also go straight from `Pending` to `Cancelled`.
/// Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED_OUT",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "TIMED_OUT" => Ok(JobStatus::TimedOut),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(Error::InvalidInput(format!("Unknown job status: '{}'", other))),
        }
    }
}

/// Status of a single document within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkItemStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl WorkItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::Succeeded
                | WorkItemStatus::Failed
                | WorkItemStatus::TimedOut
                | WorkItemStatus::Cancelled
        )
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// How the delay between analysis retries grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `retry_delay_ms * attempt`
    #[default]
    Linear,
    /// `retry_delay_ms * 2^(attempt - 1)`
    Exponential,
    /// `retry_delay_ms` between every attempt
    Fixed,
}

impl BackoffStrategy {
    /// Delay before retrying after the given failed attempt (1-indexed).
    pub fn delay(&self, base_ms: u64, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let ms = match self {
            BackoffStrategy::Linear => base_ms.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                base_ms.saturating_mul(factor)
            }
            BackoffStrategy::Fixed => base_ms,
        };
        Duration::from_millis(ms)
    }
}

fn default_max_concurrent() -> usize {
    defaults::JOB_MAX_CONCURRENT
}

fn default_timeout_ms() -> u64 {
    defaults::JOB_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    defaults::JOB_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    defaults::JOB_RETRY_DELAY_MS
}

/// Per-job processing options. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Work items of this job allowed to run at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Job wall-clock budget, measured from the first item start.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first failed attempt of an item.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay between retries.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// All-or-nothing: any failed item fails the whole job.
    #[serde(default)]
    pub strict: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::JOB_MAX_CONCURRENT,
            timeout_ms: defaults::JOB_TIMEOUT_MS,
            retry_attempts: defaults::JOB_RETRY_ATTEMPTS,
            retry_delay_ms: defaults::JOB_RETRY_DELAY_MS,
            backoff: BackoffStrategy::default(),
            strict: false,
        }
    }
}

impl JobOptions {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(self.retry_delay_ms, attempt)
    }

    /// Reject option values the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::InvalidInput(
                "maxConcurrent must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent > defaults::JOB_MAX_CONCURRENT_CAP {
            return Err(Error::InvalidInput(format!(
                "maxConcurrent must not exceed {}",
                defaults::JOB_MAX_CONCURRENT_CAP
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidInput(
                "timeoutMs must be greater than 0".to_string(),
            ));
        }
        if self.retry_attempts > defaults::JOB_RETRY_ATTEMPTS_CAP {
            return Err(Error::InvalidInput(format!(
                "retryAttempts must not exceed {}",
                defaults::JOB_RETRY_ATTEMPTS_CAP
            )));
        }
        Ok(())
    }
}

// =============================================================================
// WORK ITEM
// =============================================================================

/// The unit of work for one document within a job. Owned by its job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub document_id: DocumentId,
    pub status: WorkItemStatus,
    /// Analysis attempts made so far.
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// Last failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the item first became RUNNING.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Start of the current (or last) attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn new(document_id: impl Into<DocumentId>) -> Self {
        Self {
            document_id: document_id.into(),
            status: WorkItemStatus::Pending,
            attempt: 0,
            result: None,
            error: None,
            dispatched_at: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Dispatch-to-finish duration, when both ends are recorded.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.dispatched_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

// =============================================================================
// API VIEWS
// =============================================================================

/// Returned synchronously when a job is accepted for processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub document_count: usize,
    #[serde(rename = "type")]
    pub job_type: JobType,
}

/// Analysis output of one succeeded document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResult {
    pub document_id: DocumentId,
    pub result: JsonValue,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Failure record of one document that did not succeed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentError {
    pub document_id: DocumentId,
    pub status: WorkItemStatus,
    pub error: String,
    pub attempts: u32,
}

/// Point-in-time view of a job, returned by the status query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    /// Percent of items in a terminal state.
    pub progress: u8,
    /// Items that succeeded.
    pub processed_documents: usize,
    /// Items that exhausted their retries.
    pub failed_documents: usize,
    pub timed_out_documents: usize,
    pub cancelled_documents: usize,
    pub running_documents: usize,
    pub total_documents: usize,
    /// Milliseconds; `None` until the first item finishes.
    pub estimated_time_remaining: Option<u64>,
    pub cancel_requested: bool,
    pub results: Vec<DocumentResult>,
    pub errors: Vec<DocumentError>,
    pub items: Vec<WorkItem>,
    pub options: JobOptions,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Queue-wide counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_jobs: usize,
    pub pending: usize,
    pub processing: usize,
    pub terminal: usize,
    pub active_workers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_type_parse_canonical_and_aliases() {
        assert_eq!("full_analysis".parse::<JobType>().unwrap(), JobType::FullAnalysis);
        assert_eq!("quality".parse::<JobType>().unwrap(), JobType::QualityOnly);
        assert_eq!(
            "Extraction-Only".parse::<JobType>().unwrap(),
            JobType::ExtractionOnly
        );
        assert_eq!(" batch ".parse::<JobType>().unwrap(), JobType::Batch);
    }

    #[test]
    fn test_job_type_parse_unknown_is_invalid_input() {
        let err = "ocr".parse::<JobType>().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.to_string().contains("ocr"));
    }

    #[test]
    fn test_job_type_display_matches_serde() {
        for job_type in JobType::ALL {
            let json = serde_json::to_value(job_type).unwrap();
            assert_eq!(json, json!(job_type.to_string()));
        }
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::TimedOut.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&JobStatus::TimedOut).unwrap(),
            r#""TIMED_OUT""#
        );
        assert_eq!("timed_out".parse::<JobStatus>().unwrap(), JobStatus::TimedOut);
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_work_item_status_terminal() {
        assert!(!WorkItemStatus::Pending.is_terminal());
        assert!(!WorkItemStatus::Running.is_terminal());
        assert!(WorkItemStatus::Succeeded.is_terminal());
        assert!(WorkItemStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_linear_backoff() {
        let b = BackoffStrategy::Linear;
        assert_eq!(b.delay(2000, 0), Duration::ZERO);
        assert_eq!(b.delay(2000, 1), Duration::from_millis(2000));
        assert_eq!(b.delay(2000, 2), Duration::from_millis(4000));
        assert_eq!(b.delay(2000, 3), Duration::from_millis(6000));
    }

    #[test]
    fn test_exponential_backoff() {
        let b = BackoffStrategy::Exponential;
        assert_eq!(b.delay(500, 1), Duration::from_millis(500));
        assert_eq!(b.delay(500, 2), Duration::from_millis(1000));
        assert_eq!(b.delay(500, 4), Duration::from_millis(4000));
        // Saturates rather than overflowing
        assert_eq!(b.delay(u64::MAX, 70), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_fixed_backoff() {
        let b = BackoffStrategy::Fixed;
        assert_eq!(b.delay(750, 1), Duration::from_millis(750));
        assert_eq!(b.delay(750, 5), Duration::from_millis(750));
    }

    #[test]
    fn test_job_options_defaults() {
        let options = JobOptions::default();
        assert_eq!(options.max_concurrent, 5);
        assert_eq!(options.timeout_ms, 300_000);
        assert_eq!(options.retry_attempts, 2);
        assert_eq!(options.retry_delay_ms, 2_000);
        assert_eq!(options.backoff, BackoffStrategy::Linear);
        assert!(!options.strict);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_job_options_partial_json_uses_defaults() {
        let options: JobOptions = serde_json::from_value(json!({"maxConcurrent": 2})).unwrap();
        assert_eq!(options.max_concurrent, 2);
        assert_eq!(options.timeout_ms, 300_000);
        assert_eq!(options.retry_attempts, 2);

        let empty: JobOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, JobOptions::default());
    }

    #[test]
    fn test_job_options_validate_rejects_zero_concurrency() {
        let err = JobOptions::default().with_max_concurrent(0).validate().unwrap_err();
        assert!(err.to_string().contains("maxConcurrent"));
    }

    #[test]
    fn test_job_options_validate_rejects_zero_timeout() {
        assert!(JobOptions::default().with_timeout_ms(0).validate().is_err());
    }

    #[test]
    fn test_job_options_validate_rejects_excessive_retries() {
        assert!(JobOptions::default()
            .with_retry_attempts(defaults::JOB_RETRY_ATTEMPTS_CAP + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_job_options_retry_delay_uses_strategy() {
        let options = JobOptions::default().with_retry_delay_ms(100);
        assert_eq!(options.retry_delay(3), Duration::from_millis(300));

        let options = options.with_backoff(BackoffStrategy::Exponential);
        assert_eq!(options.retry_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_work_item_duration() {
        let mut item = WorkItem::new("doc-1");
        assert_eq!(item.duration_ms(), None);

        let start = Utc::now();
        item.dispatched_at = Some(start);
        item.finished_at = Some(start + chrono::Duration::milliseconds(1500));
        assert_eq!(item.duration_ms(), Some(1500));
    }

    #[test]
    fn test_job_accepted_wire_format() {
        let accepted = JobAccepted {
            job_id: Uuid::nil(),
            status: JobStatus::Pending,
            document_count: 3,
            job_type: JobType::QualityOnly,
        };
        let value = serde_json::to_value(&accepted).unwrap();
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["documentCount"], 3);
        assert_eq!(value["type"], "quality_only");
        assert!(value.get("jobId").is_some());
    }
}
