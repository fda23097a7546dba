//! Work item executor: runs one document through analysis with retries.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use loandesk_core::{DocumentId, JobOptions, JobType};

use crate::analyzer::DocumentAnalyzer;
use crate::job::ItemOutcome;
use crate::registry::JobEntry;

/// Everything needed to execute one work item on its own task.
pub struct ItemTask {
    pub entry: Arc<JobEntry>,
    pub index: usize,
    pub document_id: DocumentId,
    pub job_type: JobType,
    pub options: JobOptions,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
}

impl ItemTask {
    fn job_id(&self) -> Uuid {
        self.entry.id()
    }
}

/// Execute a work item until it succeeds, exhausts its retries, or is halted.
///
/// Attempt `n` failing schedules a retry after `options.retry_delay(n)` while
/// `n <= retry_attempts`. Cancellation does not interrupt an in-flight
/// analysis call; it stops further retries. Job timeouts abort the task
/// that runs this future.
pub async fn execute_item(task: ItemTask) -> ItemOutcome {
    let job_id = task.job_id();
    let halt = task.entry.halt_token().clone();

    loop {
        let attempt = match task.entry.lock().begin_attempt(task.index, Utc::now()) {
            Some(attempt) => attempt,
            None => return ItemOutcome::Interrupted,
        };

        let start = Instant::now();
        let result = AssertUnwindSafe(task.analyzer.analyze(&task.document_id, task.job_type))
            .catch_unwind()
            .await;

        let error = match result {
            Ok(Ok(value)) => {
                debug!(
                    %job_id,
                    document_id = %task.document_id,
                    attempt,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Document analysis succeeded"
                );
                return ItemOutcome::Succeeded(value);
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("Analyzer panicked: {}", panic_message(panic.as_ref())),
        };

        task.entry.lock().record_error(task.index, error.clone());

        if attempt > task.options.retry_attempts {
            warn!(
                %job_id,
                document_id = %task.document_id,
                attempt,
                error = %error,
                "Document analysis failed, retries exhausted"
            );
            return ItemOutcome::Failed(error);
        }
        if halt.is_cancelled() {
            return ItemOutcome::Interrupted;
        }

        let delay = task.options.retry_delay(attempt);
        warn!(
            %job_id,
            document_id = %task.document_id,
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "Document analysis failed, retrying"
        );

        tokio::select! {
            _ = halt.cancelled() => return ItemOutcome::Interrupted,
            _ = sleep(delay) => {}
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
