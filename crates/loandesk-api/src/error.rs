//! HTTP error mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Error returned by API handlers, rendered as `{"error": message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<loandesk_core::Error> for ApiError {
    fn from(err: loandesk_core::Error) -> Self {
        use loandesk_core::Error;
        match err {
            Error::JobNotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::InvalidState(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_core_error_mapping() {
        let id = Uuid::nil();
        assert_eq!(
            ApiError::from(loandesk_core::Error::JobNotFound(id)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(loandesk_core::Error::InvalidInput("empty".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(loandesk_core::Error::InvalidState("done".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(loandesk_core::Error::Analysis("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_job_not_found_message() {
        let id = Uuid::nil();
        let err = ApiError::from(loandesk_core::Error::JobNotFound(id));
        assert_eq!(err.to_string(), format!("Job {} not found", id));
    }
}
