//! Periodic eviction of terminal jobs past their retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use loandesk_core::{Error, Result};

use crate::registry::JobRegistry;

/// Evicts terminal jobs whose `finished_at` is older than the retention window.
///
/// Eviction is a hard delete. Results not read before then are gone.
pub struct CleanupSweeper {
    registry: Arc<JobRegistry>,
    retention: Duration,
    interval: Duration,
}

impl CleanupSweeper {
    pub fn new(registry: Arc<JobRegistry>, retention: Duration, interval: Duration) -> Self {
        Self {
            registry,
            retention,
            interval,
        }
    }

    /// Run one sweep as of `now`. Returns the number of evicted jobs.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let evicted = self.registry.evict_expired(now, retention);
        if evicted.is_empty() {
            debug!(remaining = self.registry.len(), "Sweep found nothing to evict");
        } else {
            info!(
                evicted_count = evicted.len(),
                remaining = self.registry.len(),
                "Evicted expired jobs"
            );
        }
        evicted.len()
    }

    /// Start sweeping every `interval` on a background task.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let period = self.interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            info!(
                interval_secs = period.as_secs(),
                retention_secs = self.retention.as_secs(),
                "Cleanup sweeper started"
            );
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Cleanup sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep(Utc::now());
                    }
                }
            }
            info!("Cleanup sweeper stopped");
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Handle for controlling a running sweeper.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Cleanup sweeper task ended abnormally");
            return Err(Error::Internal(format!("Sweeper task failed: {}", e)));
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ItemOutcome, Job};
    use loandesk_core::{JobOptions, JobType};
    use serde_json::json;
    use uuid::Uuid;

    fn finished_job(registry: &JobRegistry, finished: DateTime<Utc>) -> Uuid {
        let job = Job::new(
            Uuid::now_v7(),
            JobType::Batch,
            vec!["doc-1".to_string()],
            JobOptions::default(),
            finished,
        );
        let entry = registry.insert(job);
        let mut job = entry.lock();
        job.start_item(0, finished).unwrap();
        job.finish_item(
            0,
            ItemOutcome::Succeeded(json!({})),
            std::time::Duration::ZERO,
            finished,
        );
        entry.id()
    }

    #[test]
    fn test_sweep_evicts_only_expired() {
        let registry = Arc::new(JobRegistry::new());
        let now = Utc::now();
        let old = finished_job(&registry, now - chrono::Duration::hours(25));
        let fresh = finished_job(&registry, now - chrono::Duration::hours(1));

        let sweeper = CleanupSweeper::new(
            registry.clone(),
            Duration::from_secs(24 * 3600),
            Duration::from_secs(3600),
        );
        assert_eq!(sweeper.sweep(now), 1);
        assert!(registry.get(old).is_err());
        assert!(registry.get(fresh).is_ok());
    }

    #[test]
    fn test_sweep_empty_registry() {
        let sweeper = CleanupSweeper::new(
            Arc::new(JobRegistry::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        assert_eq!(sweeper.sweep(Utc::now()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_and_shutdown() {
        let registry = Arc::new(JobRegistry::new());
        let old = finished_job(&registry, Utc::now() - chrono::Duration::hours(2));

        let handle = CleanupSweeper::new(
            registry.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        )
        .start();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(registry.get(old).is_err());

        assert!(!handle.is_finished());
        handle.shutdown().await.unwrap();
    }
}
