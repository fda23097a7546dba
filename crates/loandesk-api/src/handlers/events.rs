//! Server-Sent Events stream of job events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use loandesk_jobs::{defaults, EventEnvelope};

use crate::AppState;

/// Clients connect to `/api/v1/events` and receive every job event as it is
/// published. The SSE `event` field carries the namespaced type.
pub async fn sse_events(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.scheduler.events().subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result: Result<EventEnvelope, _>| {
        match result {
            Ok(envelope) => match serde_json::to_string(&envelope) {
                Ok(json) => Some(Ok(Event::default().event(envelope.event_type).data(json))),
                Err(_) => None,
            },
            // Lagged receivers skip ahead
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(defaults::SSE_KEEP_ALIVE_SECS))
            .text("keepalive"),
    )
}
