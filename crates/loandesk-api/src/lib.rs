//! # loandesk-api
//!
//! HTTP surface for the loandesk document processing queue.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/jobs` | Submit a batch of documents (`202`) |
//! | `GET` | `/api/v1/jobs` | List jobs, newest first (`?status=`) |
//! | `GET` | `/api/v1/jobs/stats` | Queue statistics |
//! | `GET` | `/api/v1/jobs/:id` | Job status, progress, results and errors |
//! | `POST` | `/api/v1/jobs/:id/cancel` | Request cancellation (`202`/`409`/`404`) |
//! | `GET` | `/api/v1/events` | Server-Sent Events stream of job events |
//! | `GET` | `/health` | Liveness probe |

pub mod error;
pub mod handlers;
pub mod telemetry;

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use loandesk_jobs::Scheduler;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/api/v1/jobs",
            post(handlers::jobs::submit_job).get(handlers::jobs::list_jobs),
        )
        .route("/api/v1/jobs/stats", get(handlers::jobs::queue_stats))
        .route("/api/v1/jobs/:id", get(handlers::jobs::get_job))
        .route("/api/v1/jobs/:id/cancel", post(handlers::jobs::cancel_job))
        .route("/api/v1/events", get(handlers::events::sse_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(parse_allowed_origins()))
        .with_state(state)
}

fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Read `ALLOWED_ORIGINS` (comma separated). Defaults to the local dev origin.
pub fn parse_allowed_origins() -> Vec<HeaderValue> {
    let origins_str =
        std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".to_string());
    parse_origin_list(&origins_str)
}

fn parse_origin_list(origins_str: &str) -> Vec<HeaderValue> {
    if origins_str.trim().is_empty() {
        return vec![HeaderValue::from_static("http://localhost:3000")];
    }

    origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origin_list() {
        let origins = parse_origin_list("https://crm.example.com, ,http://localhost:5173");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://crm.example.com");
        assert_eq!(origins[1], "http://localhost:5173");
    }

    #[test]
    fn test_parse_origin_list_empty_falls_back() {
        let origins = parse_origin_list("  ");
        assert_eq!(origins, vec![HeaderValue::from_static("http://localhost:3000")]);
    }
}
