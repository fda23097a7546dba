//! Scheduler: admits jobs and drives their work items through a bounded pool.
//!
//! Each submitted job gets one driver task. The driver dispatches items in
//! submission order, keeps at most `maxConcurrent` of them in flight, refills
//! a slot as soon as an item finishes, and enforces the job deadline. When a
//! process-wide limit is configured, every in-flight item also holds one
//! permit from a shared semaphore.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use loandesk_core::{
    defaults, DocumentId, Error, EventPublisher, JobAccepted, JobEvent, JobOptions, JobSnapshot,
    JobStatus, JobType, QueueStats, Result,
};

use crate::analyzer::DocumentAnalyzer;
use crate::executor::{execute_item, ItemTask};
use crate::job::{CancelOutcome, ItemOutcome, Job};
use crate::registry::{JobEntry, JobRegistry};
use crate::sweeper::{CleanupSweeper, SweeperHandle};

// =============================================================================
// CONFIG
// =============================================================================

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Process-wide cap on in-flight work items. `None` leaves only the
    /// per-job limit.
    pub global_max_concurrent: Option<usize>,
    /// Maximum documents accepted per job.
    pub max_batch_size: usize,
    /// How long terminal jobs stay queryable.
    pub retention: Duration,
    /// How often the cleanup sweeper runs.
    pub sweep_interval: Duration,
    /// Broadcast capacity of the event stream.
    pub event_capacity: usize,
    /// Maximum synchronous event handlers.
    pub max_event_handlers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            global_max_concurrent: None,
            max_batch_size: defaults::BATCH_MAX_DOCUMENTS,
            retention: Duration::from_secs(defaults::JOB_RETENTION_SECS),
            sweep_interval: Duration::from_secs(defaults::SWEEP_INTERVAL_SECS),
            event_capacity: defaults::EVENT_BUS_CAPACITY,
            max_event_handlers: defaults::EVENT_MAX_HANDLERS,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `QUEUE_GLOBAL_MAX_CONCURRENT` | unset | Process-wide in-flight item cap |
    /// | `QUEUE_MAX_BATCH_SIZE` | `50` | Max documents per job |
    /// | `QUEUE_RETENTION_SECS` | `86400` | Terminal job retention |
    /// | `QUEUE_SWEEP_INTERVAL_SECS` | `3600` | Cleanup sweep period |
    /// | `EVENT_BUS_CAPACITY` | `256` | Event stream buffer |
    /// | `EVENT_MAX_HANDLERS` | `64` | Max registered event handlers |
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
        }

        let global_max_concurrent =
            parse::<usize>("QUEUE_GLOBAL_MAX_CONCURRENT").filter(|n| *n > 0);

        let max_batch_size = parse::<usize>("QUEUE_MAX_BATCH_SIZE")
            .unwrap_or(defaults::BATCH_MAX_DOCUMENTS)
            .max(1);

        let retention_secs =
            parse::<u64>("QUEUE_RETENTION_SECS").unwrap_or(defaults::JOB_RETENTION_SECS);

        let sweep_interval_secs = parse::<u64>("QUEUE_SWEEP_INTERVAL_SECS")
            .unwrap_or(defaults::SWEEP_INTERVAL_SECS)
            .max(1);

        let event_capacity = parse::<usize>("EVENT_BUS_CAPACITY")
            .unwrap_or(defaults::EVENT_BUS_CAPACITY)
            .max(1);

        let max_event_handlers =
            parse::<usize>("EVENT_MAX_HANDLERS").unwrap_or(defaults::EVENT_MAX_HANDLERS);

        Self {
            global_max_concurrent,
            max_batch_size,
            retention: Duration::from_secs(retention_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            event_capacity,
            max_event_handlers,
        }
    }

    pub fn with_global_max_concurrent(mut self, max: Option<usize>) -> Self {
        self.global_max_concurrent = max;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_max_event_handlers(mut self, max: usize) -> Self {
        self.max_event_handlers = max;
        self
    }
}

// =============================================================================
// WORKER SLOTS
// =============================================================================

/// One occupied worker slot. Releases its global permit and decrements the
/// active worker gauge on drop.
struct WorkerSlot {
    _permit: Option<OwnedSemaphorePermit>,
    active: Arc<AtomicUsize>,
}

impl WorkerSlot {
    fn new(permit: Option<OwnedSemaphorePermit>, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            _permit: permit,
            active,
        }
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

struct Inner {
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    events: Arc<EventPublisher>,
    analyzer: Arc<dyn DocumentAnalyzer>,
    global_slots: Option<Arc<Semaphore>>,
    active_workers: Arc<AtomicUsize>,
}

/// Cloneable handle to the job scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, analyzer: Arc<dyn DocumentAnalyzer>) -> Self {
        SchedulerBuilder::new(analyzer).with_config(config).build()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    pub fn events(&self) -> &Arc<EventPublisher> {
        &self.inner.events
    }

    /// Work items currently holding a worker slot, across all jobs.
    pub fn active_workers(&self) -> usize {
        self.inner.active_workers.load(Ordering::SeqCst)
    }

    /// Validate and admit a job, then start driving it in the background.
    ///
    /// Returns as soon as the job is registered as PENDING. Must be called
    /// from within a Tokio runtime.
    pub fn submit(
        &self,
        document_ids: Vec<DocumentId>,
        job_type: JobType,
        options: JobOptions,
    ) -> Result<JobAccepted> {
        self.validate(&document_ids, &options)?;

        let document_count = document_ids.len();
        let job = Job::new(Uuid::now_v7(), job_type, document_ids, options, Utc::now());
        let entry = self.inner.registry.insert(job);
        let job_id = entry.id();

        info!(%job_id, %job_type, document_count, "Job accepted");
        entry.update(|_, events| {
            events.push(JobEvent::Queued {
                job_id,
                job_type,
                document_count,
            })
        });
        entry.flush_events(&self.inner.events);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.drive(entry).await;
        });

        Ok(JobAccepted {
            job_id,
            status: JobStatus::Pending,
            document_count,
            job_type,
        })
    }

    fn validate(&self, document_ids: &[DocumentId], options: &JobOptions) -> Result<()> {
        if document_ids.is_empty() {
            return Err(Error::InvalidInput(
                "documentIds must not be empty".to_string(),
            ));
        }
        let max = self.inner.config.max_batch_size;
        if document_ids.len() > max {
            return Err(Error::InvalidInput(format!(
                "documentIds must not contain more than {} entries (got {})",
                max,
                document_ids.len()
            )));
        }
        if let Some(pos) = document_ids.iter().position(|id| id.trim().is_empty()) {
            return Err(Error::InvalidInput(format!(
                "documentIds[{}] must not be blank",
                pos
            )));
        }
        options.validate()
    }

    /// Request cancellation of a job.
    ///
    /// Idempotent while the job drains. Fails with `InvalidState` once the
    /// job is terminal and `JobNotFound` for unknown ids.
    pub fn cancel(&self, job_id: Uuid) -> Result<CancelOutcome> {
        let entry = self
            .inner
            .registry
            .entry(job_id)
            .ok_or(Error::JobNotFound(job_id))?;

        let outcome = entry.update(|job, events| {
            let (outcome, produced) = job.request_cancel(Utc::now());
            events.extend(produced);
            outcome
        });
        if let CancelOutcome::AlreadyTerminal(status) = outcome {
            return Err(Error::InvalidState(format!(
                "Job {} is already {}",
                job_id, status
            )));
        }
        entry.halt_token().cancel();

        match outcome {
            CancelOutcome::AlreadyTerminal(_) => {}
            CancelOutcome::Cancelled => info!(%job_id, "Job cancelled"),
            CancelOutcome::CancelRequested => {
                info!(%job_id, "Job cancellation requested, draining in-flight items")
            }
            CancelOutcome::AlreadyRequested => debug!(%job_id, "Job cancellation already pending"),
        }
        entry.flush_events(&self.inner.events);
        Ok(outcome)
    }

    pub fn get(&self, job_id: Uuid) -> Result<JobSnapshot> {
        self.inner.registry.get(job_id)
    }

    /// All jobs, newest first, optionally filtered by status.
    pub fn list(&self, status: Option<JobStatus>) -> Vec<JobSnapshot> {
        match status {
            Some(status) => self.inner.registry.list_by_status(status),
            None => self.inner.registry.list(),
        }
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = self.inner.registry.stats();
        stats.active_workers = self.active_workers();
        stats
    }

    /// Start the periodic cleanup sweeper for this scheduler's registry.
    pub fn start_sweeper(&self) -> SweeperHandle {
        CleanupSweeper::new(
            self.inner.registry.clone(),
            self.inner.config.retention,
            self.inner.config.sweep_interval,
        )
        .start()
    }
}

impl Inner {
    async fn acquire_slot(&self) -> Result<WorkerSlot> {
        let permit = match &self.global_slots {
            Some(slots) => Some(
                slots
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Internal("Worker slot pool closed".to_string()))?,
            ),
            None => None,
        };
        Ok(WorkerSlot::new(permit, self.active_workers.clone()))
    }

    /// Drive one job from PENDING to a terminal state.
    #[instrument(skip(self, entry), fields(job_id = %entry.id()))]
    async fn drive(self: Arc<Self>, entry: Arc<JobEntry>) {
        let (job_type, options, document_ids) = {
            let job = entry.lock();
            let ids: Vec<DocumentId> = job.items().iter().map(|i| i.document_id.clone()).collect();
            (job.job_type(), job.options().clone(), ids)
        };
        let total = document_ids.len();
        let max_concurrent = options.max_concurrent.max(1);
        let halt = entry.halt_token().clone();

        let mut in_flight: JoinSet<(usize, ItemOutcome, Duration)> = JoinSet::new();
        let mut next = 0;
        let mut halted = false;
        let mut deadline: Option<Instant> = None;

        loop {
            let can_dispatch = !halted && next < total && in_flight.len() < max_concurrent;
            if !can_dispatch && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = wait_for(deadline) => {
                    let timed_out = entry.update(|job, events| {
                        if job.cancel_requested() {
                            return false;
                        }
                        events.extend(job.time_out(Utc::now()));
                        true
                    });
                    if !timed_out {
                        debug!("Deadline passed while cancellation drains");
                        deadline = None;
                        continue;
                    }
                    debug!(aborted = in_flight.len(), "Aborting in-flight work items");
                    in_flight.abort_all();
                    halt.cancel();
                    warn!(timeout_ms = options.timeout_ms, "Job timed out");
                    entry.flush_events(&self.events);
                    break;
                }

                _ = halt.cancelled(), if !halted => {
                    debug!("Dispatch halted");
                    halted = true;
                    // In-flight items finish naturally once cancellation is requested.
                    if entry.lock().cancel_requested() {
                        deadline = None;
                    }
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match joined {
                        Ok((index, outcome, elapsed)) => {
                            entry.update(|job, events| {
                                events.extend(job.finish_item(index, outcome, elapsed, Utc::now()));
                            });
                            entry.flush_events(&self.events);
                        }
                        Err(e) => error!(error = %e, "Work item task failed"),
                    }
                }

                slot = self.acquire_slot(), if can_dispatch => {
                    let slot = match slot {
                        Ok(slot) => slot,
                        Err(e) => {
                            error!(error = %e, "Failed to acquire worker slot");
                            halted = true;
                            continue;
                        }
                    };

                    let index = next;
                    next += 1;
                    let started = entry.update(|job, events| {
                        match job.start_item(index, Utc::now()) {
                            Some(produced) => {
                                events.extend(produced);
                                true
                            }
                            None => false,
                        }
                    });
                    if !started {
                        halted = true;
                        continue;
                    }
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + options.timeout());
                    }

                    debug!(
                        item_index = index,
                        document_id = %document_ids[index],
                        active_workers = self.active_workers.load(Ordering::SeqCst),
                        "Dispatching work item"
                    );
                    entry.flush_events(&self.events);

                    let task = ItemTask {
                        entry: entry.clone(),
                        index,
                        document_id: document_ids[index].clone(),
                        job_type,
                        options: options.clone(),
                        analyzer: self.analyzer.clone(),
                    };
                    in_flight.spawn(async move {
                        let _slot = slot;
                        let dispatched = Instant::now();
                        let outcome = AssertUnwindSafe(execute_item(task))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                ItemOutcome::Failed("Work item executor panicked".to_string())
                            });
                        (index, outcome, dispatched.elapsed())
                    });
                }
            }
        }

        // Aborted tasks still hold their slots until dropped.
        while in_flight.join_next().await.is_some() {}

        let job = entry.lock();
        let status = job.status();
        if status.is_terminal() {
            info!(
                %status,
                progress = job.progress(),
                total_documents = total,
                "Job finished"
            );
        } else {
            error!(%status, "Job driver exited before the job was terminal");
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builder for configuring a scheduler.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    analyzer: Arc<dyn DocumentAnalyzer>,
    registry: Option<Arc<JobRegistry>>,
    events: Option<Arc<EventPublisher>>,
}

impl SchedulerBuilder {
    pub fn new(analyzer: Arc<dyn DocumentAnalyzer>) -> Self {
        Self {
            config: SchedulerConfig::default(),
            analyzer,
            registry: None,
            events: None,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing registry instead of creating one.
    pub fn with_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share an existing event publisher instead of creating one.
    pub fn with_events(mut self, events: Arc<EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Scheduler {
        let config = self.config;
        let events = self.events.unwrap_or_else(|| {
            Arc::new(EventPublisher::new(
                config.event_capacity,
                config.max_event_handlers,
            ))
        });
        let global_slots = config
            .global_max_concurrent
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        debug!(
            global_max_concurrent = ?config.global_max_concurrent,
            max_batch_size = config.max_batch_size,
            analyzer = self.analyzer.name(),
            "Scheduler configured"
        );

        Scheduler {
            inner: Arc::new(Inner {
                registry: self.registry.unwrap_or_default(),
                events,
                analyzer: self.analyzer,
                global_slots,
                active_workers: Arc::new(AtomicUsize::new(0)),
                config,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::NoOpAnalyzer;

    fn scheduler(config: SchedulerConfig) -> Scheduler {
        Scheduler::new(config, Arc::new(NoOpAnalyzer::new()))
    }

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.global_max_concurrent, None);
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.retention, Duration::from_secs(86_400));
        assert_eq!(config.sweep_interval, Duration::from_secs(3_600));
    }

    #[test]
    fn test_config_builder() {
        let config = SchedulerConfig::default()
            .with_global_max_concurrent(Some(8))
            .with_max_batch_size(10)
            .with_retention(Duration::from_secs(60))
            .with_sweep_interval(Duration::from_secs(5))
            .with_event_capacity(16)
            .with_max_event_handlers(2);
        assert_eq!(config.global_max_concurrent, Some(8));
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.retention, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.event_capacity, 16);
        assert_eq!(config.max_event_handlers, 2);
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_batch() {
        let scheduler = scheduler(SchedulerConfig::default());
        let err = scheduler
            .submit(vec![], JobType::FullAnalysis, JobOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(scheduler.registry().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_oversized_batch() {
        let scheduler = scheduler(SchedulerConfig::default().with_max_batch_size(3));
        let ids = (0..4).map(|i| format!("doc-{}", i)).collect();
        let err = scheduler
            .submit(ids, JobType::Batch, JobOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("more than 3"));
        assert!(scheduler.registry().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_blank_document_id() {
        let scheduler = scheduler(SchedulerConfig::default());
        let err = scheduler
            .submit(
                vec!["doc-1".into(), "  ".into()],
                JobType::QualityOnly,
                JobOptions::default(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("documentIds[1]"));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_options() {
        let scheduler = scheduler(SchedulerConfig::default());
        let err = scheduler
            .submit(
                vec!["doc-1".into()],
                JobType::QualityOnly,
                JobOptions::default().with_max_concurrent(0),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_submit_returns_pending_acceptance() {
        let scheduler = scheduler(SchedulerConfig::default());
        let accepted = scheduler
            .submit(
                vec!["doc-1".into(), "doc-2".into()],
                JobType::ExtractionOnly,
                JobOptions::default(),
            )
            .unwrap();

        assert_eq!(accepted.status, JobStatus::Pending);
        assert_eq!(accepted.document_count, 2);
        assert_eq!(accepted.job_type, JobType::ExtractionOnly);
        assert_eq!(scheduler.get(accepted.job_id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let scheduler = scheduler(SchedulerConfig::default());
        let err = scheduler.cancel(Uuid::now_v7()).unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_worker_slot_tracks_active_workers() {
        let active = Arc::new(AtomicUsize::new(0));
        let slot = WorkerSlot::new(None, active.clone());
        assert_eq!(active.load(Ordering::SeqCst), 1);
        drop(slot);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_builder_shares_registry() {
        let registry = Arc::new(JobRegistry::new());
        let scheduler = SchedulerBuilder::new(Arc::new(NoOpAnalyzer::new()))
            .with_registry(registry.clone())
            .build();
        scheduler
            .submit(vec!["doc-1".into()], JobType::Batch, JobOptions::default())
            .unwrap();
        assert_eq!(registry.len(), 1);
    }
}
