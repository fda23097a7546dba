//! Job aggregate: work items, counters, progress, and terminal status.
//!
//! A [`Job`] is plain data guarded by its registry entry's mutex. Every
//! mutating method returns the events the transition produced so the caller
//! can publish them after releasing the lock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use loandesk_core::{
    DocumentError, DocumentId, DocumentResult, JobEvent, JobOptions, JobOutcome, JobProgress,
    JobSnapshot, JobStatus, JobType, WorkItem, WorkItemStatus,
};

/// How one work item's execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Succeeded(JsonValue),
    /// Retries exhausted; carries the last error.
    Failed(String),
    /// Execution stopped early by cancellation.
    Interrupted,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Nothing was running; the job is now CANCELLED.
    Cancelled,
    /// In-flight items are draining; the job becomes CANCELLED when they finish.
    CancelRequested,
    /// A previous request is still draining.
    AlreadyRequested,
    AlreadyTerminal(JobStatus),
}

#[derive(Debug, Clone)]
pub struct Job {
    id: Uuid,
    job_type: JobType,
    options: JobOptions,
    items: Vec<WorkItem>,
    status: JobStatus,
    cancel_requested: bool,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,

    succeeded: usize,
    failed: usize,
    timed_out: usize,
    cancelled: usize,
    running: usize,

    duration_sum_ms: u64,
    duration_samples: u64,
    progress: u8,
}

impl Job {
    pub fn new(
        id: Uuid,
        job_type: JobType,
        document_ids: Vec<DocumentId>,
        options: JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_type,
            options,
            items: document_ids.into_iter().map(WorkItem::new).collect(),
            status: JobStatus::Pending,
            cancel_requested: false,
            created_at: now,
            started_at: None,
            finished_at: None,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            cancelled: 0,
            running: 0,
            duration_sum_ms: 0,
            duration_samples: 0,
            progress: 0,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&WorkItem> {
        self.items.get(index)
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Items currently RUNNING.
    pub fn running(&self) -> usize {
        self.running
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    fn finished_count(&self) -> usize {
        self.succeeded + self.failed + self.timed_out + self.cancelled
    }

    /// Average finished-item duration times remaining items.
    ///
    /// `None` until at least one item has finished naturally.
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        if self.duration_samples == 0 {
            return None;
        }
        let avg = self.duration_sum_ms / self.duration_samples;
        let remaining = self.total().saturating_sub(self.finished_count()) as u64;
        Some(avg.saturating_mul(remaining))
    }

    // =========================================================================
    // Item transitions
    // =========================================================================

    /// Move a PENDING item to RUNNING.
    ///
    /// Returns `None` when the item may not start: the job is terminal or
    /// cancelling, or the item already left PENDING. The first start moves the
    /// job to PROCESSING and yields a `started` event.
    pub fn start_item(&mut self, index: usize, now: DateTime<Utc>) -> Option<Vec<JobEvent>> {
        if self.is_terminal() || self.cancel_requested {
            return None;
        }
        let item = self.items.get_mut(index)?;
        if item.status != WorkItemStatus::Pending {
            return None;
        }
        item.status = WorkItemStatus::Running;
        item.dispatched_at = Some(now);
        self.running += 1;

        let mut events = Vec::new();
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Processing;
            self.started_at = Some(now);
            events.push(JobEvent::Started {
                job_id: self.id,
                job_type: self.job_type,
                document_count: self.total(),
            });
        }
        Some(events)
    }

    /// Record the start of an analysis attempt on a RUNNING item.
    ///
    /// Returns the 1-based attempt number, or `None` if the item is no longer
    /// running or cancellation is pending.
    pub fn begin_attempt(&mut self, index: usize, now: DateTime<Utc>) -> Option<u32> {
        if self.is_terminal() || self.cancel_requested {
            return None;
        }
        let item = self.items.get_mut(index)?;
        if item.status != WorkItemStatus::Running {
            return None;
        }
        item.attempt += 1;
        item.started_at = Some(now);
        Some(item.attempt)
    }

    /// Remember the latest failure of a RUNNING item.
    pub fn record_error(&mut self, index: usize, error: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        if let Some(item) = self.items.get_mut(index) {
            if item.status == WorkItemStatus::Running {
                item.error = Some(error.into());
            }
        }
    }

    /// Settle a RUNNING item with the executor's outcome.
    ///
    /// `elapsed` is the dispatch-to-finish time and feeds the ETA average when
    /// the item finished naturally. Late outcomes (job already terminal, item
    /// no longer running) are discarded. While cancellation is pending the
    /// item becomes CANCELLED regardless of the outcome.
    pub fn finish_item(
        &mut self,
        index: usize,
        outcome: ItemOutcome,
        elapsed: Duration,
        now: DateTime<Utc>,
    ) -> Vec<JobEvent> {
        if self.is_terminal() {
            return Vec::new();
        }
        let cancel_requested = self.cancel_requested;
        let Some(item) = self.items.get_mut(index) else {
            return Vec::new();
        };
        if item.status != WorkItemStatus::Running {
            return Vec::new();
        }

        item.finished_at = Some(now);
        self.running -= 1;

        let mut natural = false;
        match outcome {
            _ if cancel_requested => {
                item.status = WorkItemStatus::Cancelled;
                self.cancelled += 1;
            }
            ItemOutcome::Succeeded(value) => {
                item.status = WorkItemStatus::Succeeded;
                item.result = Some(value);
                item.error = None;
                self.succeeded += 1;
                natural = true;
            }
            ItemOutcome::Failed(error) => {
                item.status = WorkItemStatus::Failed;
                item.error = Some(error);
                self.failed += 1;
                natural = true;
            }
            ItemOutcome::Interrupted => {
                item.status = WorkItemStatus::Cancelled;
                self.cancelled += 1;
            }
        }
        if natural {
            let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            self.duration_sum_ms = self.duration_sum_ms.saturating_add(ms);
            self.duration_samples += 1;
        }

        let mut events = vec![self.recompute_progress()];
        events.extend(self.settle(now));
        events
    }

    // =========================================================================
    // Job transitions
    // =========================================================================

    /// Request cancellation.
    ///
    /// PENDING items become CANCELLED immediately; RUNNING items drain and
    /// are cancelled by [`Job::finish_item`].
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> (CancelOutcome, Vec<JobEvent>) {
        if self.is_terminal() {
            return (CancelOutcome::AlreadyTerminal(self.status), Vec::new());
        }
        if self.cancel_requested {
            return (CancelOutcome::AlreadyRequested, Vec::new());
        }
        self.cancel_requested = true;

        let mut dropped = 0;
        for item in self
            .items
            .iter_mut()
            .filter(|i| i.status == WorkItemStatus::Pending)
        {
            item.status = WorkItemStatus::Cancelled;
            item.finished_at = Some(now);
            dropped += 1;
        }
        self.cancelled += dropped;

        let mut events = Vec::new();
        if dropped > 0 {
            events.push(self.recompute_progress());
        }
        match self.settle(now) {
            Some(terminal) => {
                events.push(terminal);
                (CancelOutcome::Cancelled, events)
            }
            None => (CancelOutcome::CancelRequested, events),
        }
    }

    /// Expire the job: every PENDING or RUNNING item becomes TIMED_OUT.
    ///
    /// A job whose cancellation is draining does not time out; it ends
    /// CANCELLED once its in-flight items finish.
    pub fn time_out(&mut self, now: DateTime<Utc>) -> Vec<JobEvent> {
        if self.is_terminal() || self.cancel_requested {
            return Vec::new();
        }
        let message = format!("Job exceeded timeout of {}ms", self.options.timeout_ms);
        let mut expired = 0;
        for item in self.items.iter_mut().filter(|i| {
            matches!(i.status, WorkItemStatus::Pending | WorkItemStatus::Running)
        }) {
            item.status = WorkItemStatus::TimedOut;
            item.error = Some(message.clone());
            item.finished_at = Some(now);
            expired += 1;
        }
        self.timed_out += expired;
        self.running = 0;

        let mut events = vec![self.recompute_progress()];
        events.extend(self.finalize(JobStatus::TimedOut, now));
        events
    }

    /// Reach a terminal state if the current counters call for one.
    fn settle(&mut self, now: DateTime<Utc>) -> Option<JobEvent> {
        if self.cancel_requested {
            if self.running == 0 {
                return self.finalize(JobStatus::Cancelled, now);
            }
            return None;
        }
        if self.finished_count() < self.total() {
            return None;
        }
        let status = if self.failed > 0 && (self.options.strict || self.succeeded == 0) {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        self.finalize(status, now)
    }

    fn finalize(&mut self, status: JobStatus, now: DateTime<Utc>) -> Option<JobEvent> {
        if self.is_terminal() {
            return None;
        }
        self.status = status;
        self.finished_at = Some(now);
        JobEvent::terminal(self.outcome())
    }

    fn recompute_progress(&mut self) -> JobEvent {
        let total = self.total();
        let finished = self.finished_count();
        // Round half up without floating point.
        let pct = if total == 0 {
            100
        } else {
            (200 * finished + total) / (2 * total)
        };
        self.progress = pct.min(100) as u8;
        JobEvent::Progress(self.progress_view())
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn progress_view(&self) -> JobProgress {
        JobProgress {
            job_id: self.id,
            progress: self.progress,
            processed_documents: self.succeeded,
            failed_documents: self.failed,
            total_documents: self.total(),
            estimated_time_remaining: self.estimated_remaining_ms(),
        }
    }

    pub fn results(&self) -> Vec<DocumentResult> {
        self.items
            .iter()
            .filter(|i| i.status == WorkItemStatus::Succeeded)
            .filter_map(|i| {
                i.result.as_ref().map(|result| DocumentResult {
                    document_id: i.document_id.clone(),
                    result: result.clone(),
                    attempts: i.attempt,
                    duration_ms: i.duration_ms(),
                })
            })
            .collect()
    }

    /// Items that failed or timed out, with their last error.
    pub fn errors(&self) -> Vec<DocumentError> {
        self.items
            .iter()
            .filter(|i| matches!(i.status, WorkItemStatus::Failed | WorkItemStatus::TimedOut))
            .map(|i| DocumentError {
                document_id: i.document_id.clone(),
                status: i.status,
                error: i.error.clone().unwrap_or_default(),
                attempts: i.attempt,
            })
            .collect()
    }

    pub fn outcome(&self) -> JobOutcome {
        JobOutcome {
            job_id: self.id,
            status: self.status,
            results: self.results(),
            errors: self.errors(),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            job_type: self.job_type,
            status: self.status,
            progress: self.progress,
            processed_documents: self.succeeded,
            failed_documents: self.failed,
            timed_out_documents: self.timed_out,
            cancelled_documents: self.cancelled,
            running_documents: self.running,
            total_documents: self.total(),
            estimated_time_remaining: self.estimated_remaining_ms(),
            cancel_requested: self.cancel_requested,
            results: self.results(),
            errors: self.errors(),
            items: self.items.clone(),
            options: self.options.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
