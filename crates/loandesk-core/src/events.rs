//! Job lifecycle events, envelope schema, and the event publisher.
//!
//! Two delivery paths share one [`EventPublisher::emit`] call:
//!
//! - **Handlers** registered with [`EventPublisher::on`] run synchronously on
//!   the emitting task. Each handler is isolated: an `Err` or a panic is logged
//!   and counted, and never reaches the scheduler.
//! - **Subscribers** obtained from [`EventPublisher::subscribe`] receive every
//!   event wrapped in an [`EventEnvelope`] over a `tokio::sync::broadcast`
//!   channel. Slow receivers observe `Lagged` and miss events.
//!
//! Delivery is best-effort and in-process only.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{DocumentError, DocumentResult, JobStatus, JobType};

// ============================================================================
// Event payloads
// ============================================================================

/// Payload of a `progress` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: Uuid,
    pub progress: u8,
    pub processed_documents: usize,
    pub failed_documents: usize,
    pub total_documents: usize,
    /// Milliseconds; `None` until the first item finishes.
    pub estimated_time_remaining: Option<u64>,
}

/// Payload of a terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub results: Vec<DocumentResult>,
    pub errors: Vec<DocumentError>,
}

/// Event kinds a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Queued,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Queued => "queued",
            EventKind::Started => "started",
            EventKind::Progress => "progress",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Cancelled => "cancelled",
            EventKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job lifecycle event.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"progress","jobId":"...","progress":40,...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    #[serde(rename_all = "camelCase")]
    Queued {
        job_id: Uuid,
        job_type: JobType,
        document_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    Started {
        job_id: Uuid,
        job_type: JobType,
        document_count: usize,
    },
    Progress(JobProgress),
    Completed(JobOutcome),
    Failed(JobOutcome),
    Cancelled(JobOutcome),
    Timeout(JobOutcome),
}

impl JobEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            JobEvent::Queued { .. } => EventKind::Queued,
            JobEvent::Started { .. } => EventKind::Started,
            JobEvent::Progress(_) => EventKind::Progress,
            JobEvent::Completed(_) => EventKind::Completed,
            JobEvent::Failed(_) => EventKind::Failed,
            JobEvent::Cancelled(_) => EventKind::Cancelled,
            JobEvent::Timeout(_) => EventKind::Timeout,
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Queued { job_id, .. } | JobEvent::Started { job_id, .. } => *job_id,
            JobEvent::Progress(p) => p.job_id,
            JobEvent::Completed(o)
            | JobEvent::Failed(o)
            | JobEvent::Cancelled(o)
            | JobEvent::Timeout(o) => o.job_id,
        }
    }

    /// Namespaced event type for the envelope (e.g., `"job.progress"`).
    pub fn namespaced_event_type(&self) -> &'static str {
        match self.kind() {
            EventKind::Queued => "job.queued",
            EventKind::Started => "job.started",
            EventKind::Progress => "job.progress",
            EventKind::Completed => "job.completed",
            EventKind::Failed => "job.failed",
            EventKind::Cancelled => "job.cancelled",
            EventKind::Timeout => "job.timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed(_) | JobEvent::Failed(_) | JobEvent::Cancelled(_) | JobEvent::Timeout(_)
        )
    }

    /// Build the terminal event matching a terminal job status.
    ///
    /// Returns `None` for non-terminal statuses.
    pub fn terminal(outcome: JobOutcome) -> Option<Self> {
        match outcome.status {
            JobStatus::Completed => Some(JobEvent::Completed(outcome)),
            JobStatus::Failed => Some(JobEvent::Failed(outcome)),
            JobStatus::Cancelled => Some(JobEvent::Cancelled(outcome)),
            JobStatus::TimedOut => Some(JobEvent::Timeout(outcome)),
            JobStatus::Pending | JobStatus::Processing => None,
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Self-describing wrapper broadcast to stream subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// UUIDv7 for temporal ordering.
    pub event_id: Uuid,
    /// Namespaced event type (e.g., `"job.completed"`).
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: JobEvent,
}

impl EventEnvelope {
    pub fn new(event: JobEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            payload: event,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Synchronous in-process event observer.
///
/// Handlers run on the task that emits the event and must not block.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &JobEvent) -> Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&JobEvent) -> Result<()> + Send + Sync,
{
    fn handle(&self, event: &JobEvent) -> Result<()> {
        self(event)
    }
}

/// Handle returned by [`EventPublisher::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    kind: Option<EventKind>,
    handler: Arc<dyn EventHandler>,
}

// ============================================================================
// Publisher
// ============================================================================

/// Fan-out point for job events.
pub struct EventPublisher {
    tx: broadcast::Sender<EventEnvelope>,
    handlers: RwLock<Vec<Subscription>>,
    max_handlers: usize,
    next_id: AtomicU64,
    failures: AtomicU64,
}

impl EventPublisher {
    /// Create a publisher with the given broadcast capacity and handler bound.
    pub fn new(capacity: usize, max_handlers: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            handlers: RwLock::new(Vec::new()),
            max_handlers,
            next_id: AtomicU64::new(1),
            failures: AtomicU64::new(0),
        }
    }

    /// Register a handler for one event kind.
    pub fn on<H>(&self, kind: EventKind, handler: H) -> Result<SubscriptionId>
    where
        H: EventHandler + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register a handler for every event kind.
    pub fn on_any<H>(&self, handler: H) -> Result<SubscriptionId>
    where
        H: EventHandler + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(
        &self,
        kind: Option<EventKind>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.len() >= self.max_handlers {
            return Err(Error::InvalidInput(format!(
                "Handler limit of {} reached",
                self.max_handlers
            )));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        handlers.push(Subscription { id, kind, handler });
        debug!(subscription = id.0, ?kind, "Event handler registered");
        Ok(id)
    }

    /// Unregister a handler. Returns `false` if the id was unknown.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|s| s.id != id);
        handlers.len() != before
    }

    /// Deliver an event to matching handlers, then to stream subscribers.
    pub fn emit(&self, event: JobEvent) {
        let kind = event.kind();
        // Snapshot so handlers may call on/off without deadlocking.
        let matching: Vec<Subscription> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .cloned()
            .collect();

        for sub in &matching {
            match catch_unwind(AssertUnwindSafe(|| sub.handler.handle(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription = sub.id.0,
                        event_type = %kind,
                        job_id = %event.job_id(),
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription = sub.id.0,
                        event_type = %kind,
                        job_id = %event.job_id(),
                        "Event handler panicked"
                    );
                }
            }
        }

        let envelope = EventEnvelope::new(event);
        trace!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            handlers = matching.len(),
            subscriber_count = self.tx.receiver_count(),
            "Event emitted"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to the enveloped event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Number of active stream subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total handler errors and panics observed since creation.
    pub fn handler_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(
            crate::defaults::EVENT_BUS_CAPACITY,
            crate::defaults::EVENT_MAX_HANDLERS,
        )
    }
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("handlers", &self.handler_count())
            .field("max_handlers", &self.max_handlers)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
