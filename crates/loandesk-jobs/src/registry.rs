//! In-memory job registry.
//!
//! Lock order is always registry map first, then a job's own mutex, then its
//! outbox. Callers that need to mutate a job clone its [`JobEntry`] out of the
//! map and drop the map lock before locking the job.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use loandesk_core::{Error, EventPublisher, JobEvent, JobSnapshot, JobStatus, QueueStats, Result};

use crate::job::Job;

/// A registered job with its control signals.
///
/// Events produced by a transition are queued in the entry's outbox while the
/// job lock is held, and published in that order by [`JobEntry::flush_events`].
#[derive(Debug)]
pub struct JobEntry {
    id: Uuid,
    state: Mutex<Job>,
    halt: CancellationToken,
    outbox: Mutex<VecDeque<JobEvent>>,
    emitting: Mutex<()>,
}

impl JobEntry {
    pub fn new(job: Job) -> Self {
        Self {
            id: job.id(),
            state: Mutex::new(job),
            halt: CancellationToken::new(),
            outbox: Mutex::new(VecDeque::new()),
            emitting: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Lock the job state. A poisoned lock is recovered; job transitions are
    /// guarded against partial application by their own status checks.
    pub fn lock(&self) -> MutexGuard<'_, Job> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fired when cancellation is requested: stops dispatch and retry waits.
    pub fn halt_token(&self) -> &CancellationToken {
        &self.halt
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.lock().snapshot()
    }

    fn outbox(&self) -> MutexGuard<'_, VecDeque<JobEvent>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a transition under the job lock and queue the events it pushes.
    pub fn update<T>(&self, transition: impl FnOnce(&mut Job, &mut Vec<JobEvent>) -> T) -> T {
        let mut job = self.lock();
        let mut events = Vec::new();
        let out = transition(&mut job, &mut events);
        if !events.is_empty() {
            self.outbox().extend(events);
        }
        out
    }

    /// Publish queued events in transition order.
    ///
    /// Only one caller drains at a time. A caller that finds another one
    /// draining returns at once and leaves its events to that drainer, so a
    /// handler that triggers a transition on the same job does not deadlock.
    pub fn flush_events(&self, publisher: &EventPublisher) {
        loop {
            let guard = match self.emitting.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            loop {
                let batch: Vec<JobEvent> = self.outbox().drain(..).collect();
                if batch.is_empty() {
                    break;
                }
                for event in batch {
                    publisher.emit(event);
                }
            }
            drop(guard);

            // Events queued while the guard was being released.
            if self.outbox().is_empty() {
                return;
            }
        }
    }
}

/// Thread-safe store of all known jobs.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<JobEntry>>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<JobEntry>>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a job and return its shared entry.
    pub fn insert(&self, job: Job) -> Arc<JobEntry> {
        let entry = Arc::new(JobEntry::new(job));
        self.write().insert(entry.id(), entry.clone());
        entry
    }

    pub fn entry(&self, id: Uuid) -> Option<Arc<JobEntry>> {
        self.read().get(&id).cloned()
    }

    fn entries(&self) -> Vec<Arc<JobEntry>> {
        self.read().values().cloned().collect()
    }

    /// Snapshot of one job.
    pub fn get(&self, id: Uuid) -> Result<JobSnapshot> {
        self.entry(id)
            .map(|entry| entry.snapshot())
            .ok_or(Error::JobNotFound(id))
    }

    /// Snapshots of every job, newest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> =
            self.entries().iter().map(|e| e.snapshot()).collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        snapshots
    }

    pub fn list_by_status(&self, status: JobStatus) -> Vec<JobSnapshot> {
        let mut snapshots = self.list();
        snapshots.retain(|s| s.status == status);
        snapshots
    }

    /// Remove a job. Returns `false` if it was not registered.
    pub fn evict(&self, id: Uuid) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Remove terminal jobs whose `finished_at` is more than `retention` before `now`.
    pub fn evict_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> Vec<Uuid> {
        let expired: Vec<Uuid> = self
            .entries()
            .iter()
            .filter(|entry| {
                let job = entry.lock();
                match job.finished_at() {
                    Some(finished) if job.is_terminal() => now - finished > retention,
                    _ => false,
                }
            })
            .map(|entry| entry.id())
            .collect();

        if expired.is_empty() {
            return expired;
        }
        let mut jobs = self.write();
        for id in &expired {
            jobs.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Job counts by lifecycle phase. `active_workers` is left at zero for the
    /// scheduler to fill in.
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for entry in self.entries() {
            stats.total_jobs += 1;
            match entry.lock().status() {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                _ => stats.terminal += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ItemOutcome;
    use chrono::Duration;
    use loandesk_core::{EventKind, JobOptions, JobType};
    use serde_json::json;

    fn job_at(created: DateTime<Utc>) -> Job {
        Job::new(
            Uuid::now_v7(),
            JobType::QualityOnly,
            vec!["doc-a".to_string()],
            JobOptions::default(),
            created,
        )
    }

    fn complete(entry: &JobEntry, at: DateTime<Utc>) {
        let mut job = entry.lock();
        job.start_item(0, at).unwrap();
        job.finish_item(
            0,
            ItemOutcome::Succeeded(json!({})),
            std::time::Duration::ZERO,
            at,
        );
        assert!(job.is_terminal());
    }

    #[test]
    fn test_insert_and_get() {
        let registry = JobRegistry::new();
        let entry = registry.insert(job_at(Utc::now()));

        let snapshot = registry.get(entry.id()).unwrap();
        assert_eq!(snapshot.id, entry.id());
        assert_eq!(snapshot.status, JobStatus::Pending);
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_get_unknown_is_job_not_found() {
        let registry = JobRegistry::new();
        let id = Uuid::now_v7();
        match registry.get(id) {
            Err(Error::JobNotFound(missing)) => assert_eq!(missing, id),
            other => panic!("Expected JobNotFound, got {:?}", other.map(|s| s.id)),
        }
    }

    #[test]
    fn test_list_is_newest_first() {
        let registry = JobRegistry::new();
        let t0 = Utc::now();
        let older = registry.insert(job_at(t0));
        let newer = registry.insert(job_at(t0 + Duration::seconds(5)));

        let ids: Vec<Uuid> = registry.list().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer.id(), older.id()]);
    }

    #[test]
    fn test_list_by_status() {
        let registry = JobRegistry::new();
        let done = registry.insert(job_at(Utc::now()));
        registry.insert(job_at(Utc::now()));
        complete(&done, Utc::now());

        let completed = registry.list_by_status(JobStatus::Completed);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done.id());
        assert_eq!(registry.list_by_status(JobStatus::Pending).len(), 1);
    }

    #[test]
    fn test_evict() {
        let registry = JobRegistry::new();
        let entry = registry.insert(job_at(Utc::now()));

        assert!(registry.evict(entry.id()));
        assert!(!registry.evict(entry.id()));
        assert!(registry.get(entry.id()).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_evict_expired_respects_retention() {
        let registry = JobRegistry::new();
        let t0 = Utc::now();
        let old = registry.insert(job_at(t0));
        let recent = registry.insert(job_at(t0));
        let running = registry.insert(job_at(t0));

        complete(&old, t0);
        complete(&recent, t0 + Duration::hours(23));
        running.lock().start_item(0, t0).unwrap();

        let evicted = registry.evict_expired(t0 + Duration::hours(25), Duration::hours(24));
        assert_eq!(evicted, vec![old.id()]);
        assert!(registry.get(old.id()).is_err());
        assert!(registry.get(recent.id()).is_ok());
        assert!(registry.get(running.id()).is_ok());
    }

    #[test]
    fn test_flush_publishes_in_transition_order() {
        let registry = JobRegistry::new();
        let entry = registry.insert(job_at(Utc::now()));
        let publisher = EventPublisher::new(16, 4);
        let mut rx = publisher.subscribe();

        entry.update(|job, events| {
            events.extend(job.start_item(0, Utc::now()).unwrap());
        });
        entry.update(|job, events| {
            events.extend(job.finish_item(
                0,
                ItemOutcome::Succeeded(json!({})),
                std::time::Duration::ZERO,
                Utc::now(),
            ));
        });
        entry.flush_events(&publisher);

        let mut types = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            types.push(envelope.event_type);
        }
        assert_eq!(types, vec!["job.started", "job.progress", "job.completed"]);
    }

    #[test]
    fn test_transition_from_handler_is_published_after_current_event() {
        let registry = Arc::new(JobRegistry::new());
        let ids: Vec<String> = vec!["doc-a".into(), "doc-b".into()];
        let job = Job::new(
            Uuid::now_v7(),
            JobType::Batch,
            ids,
            JobOptions::default(),
            Utc::now(),
        );
        let entry = registry.insert(job);
        let publisher = Arc::new(EventPublisher::new(16, 4));
        let mut rx = publisher.subscribe();

        // Cancel the job from inside the progress handler.
        let handler_entry = entry.clone();
        let handler_publisher = Arc::downgrade(&publisher);
        publisher
            .on(EventKind::Progress, move |_: &JobEvent| -> Result<()> {
                handler_entry.update(|job, events| {
                    events.extend(job.request_cancel(Utc::now()).1);
                });
                if let Some(publisher) = handler_publisher.upgrade() {
                    handler_entry.flush_events(&publisher);
                }
                Ok(())
            })
            .unwrap();

        entry.update(|job, events| {
            events.extend(job.start_item(0, Utc::now()).unwrap());
            events.extend(job.finish_item(
                0,
                ItemOutcome::Succeeded(json!({})),
                std::time::Duration::ZERO,
                Utc::now(),
            ));
        });
        entry.flush_events(&publisher);

        let mut types = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            types.push(envelope.event_type);
        }
        assert_eq!(
            types,
            vec!["job.started", "job.progress", "job.progress", "job.cancelled"]
        );
        assert_eq!(entry.lock().status(), JobStatus::Cancelled);
    }

    #[test]
    fn test_stats_counts_phases() {
        let registry = JobRegistry::new();
        let done = registry.insert(job_at(Utc::now()));
        let running = registry.insert(job_at(Utc::now()));
        registry.insert(job_at(Utc::now()));

        complete(&done, Utc::now());
        running.lock().start_item(0, Utc::now()).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_jobs, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.terminal, 1);
        assert_eq!(stats.active_workers, 0);
    }
}
