//! Document analysis backends.
//!
//! The scheduler treats analysis as an opaque per-document operation. Every
//! error an analyzer returns is considered retryable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use loandesk_core::{defaults, Error, JobType, Result};

/// Trait for document analyzers.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Run the analysis selected by `job_type` on one document.
    async fn analyze(&self, document_id: &str, job_type: JobType) -> Result<JsonValue>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Analyzer that succeeds immediately with an empty report.
///
/// Used when no analysis backend is configured.
#[derive(Debug, Default, Clone)]
pub struct NoOpAnalyzer;

impl NoOpAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentAnalyzer for NoOpAnalyzer {
    async fn analyze(&self, document_id: &str, job_type: JobType) -> Result<JsonValue> {
        Ok(json!({
            "documentId": document_id,
            "type": job_type,
            "skipped": true,
        }))
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    document_id: &'a str,
    #[serde(rename = "type")]
    job_type: JobType,
}

/// Analyzer backed by a remote HTTP analysis service.
///
/// Posts `{"documentId": ..., "type": ...}` to the configured URL and uses the
/// JSON response body as the document's result.
pub struct HttpAnalyzer {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpAnalyzer {
    /// Create an analyzer posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(defaults::ANALYSIS_TIMEOUT_SECS),
        }
    }

    /// Create from environment variables.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `ANALYSIS_URL` | unset | Endpoint of the analysis service |
    /// | `ANALYSIS_TIMEOUT_SECS` | `120` | Per-request timeout |
    ///
    /// Returns `None` when `ANALYSIS_URL` is unset or blank.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("ANALYSIS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())?;

        let timeout_secs = std::env::var("ANALYSIS_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::ANALYSIS_TIMEOUT_SECS);

        Some(Self::new(url.trim()).with_timeout(Duration::from_secs(timeout_secs)))
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DocumentAnalyzer for HttpAnalyzer {
    async fn analyze(&self, document_id: &str, job_type: JobType) -> Result<JsonValue> {
        debug!(document_id, %job_type, url = %self.url, "Requesting analysis");

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&AnalyzeRequest {
                document_id,
                job_type,
            })
            .send()
            .await
            .map_err(|e| Error::Request(format!("Analysis request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Analysis(format!(
                "Analysis service returned {}: {}",
                status, body
            )));
        }

        response
            .json::<JsonValue>()
            .await
            .map_err(|e| Error::Analysis(format!("Failed to parse analysis response: {}", e)))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_analyzer_succeeds() {
        let analyzer = NoOpAnalyzer::new();
        let result = analyzer
            .analyze("doc-42", JobType::QualityOnly)
            .await
            .unwrap();
        assert_eq!(result["documentId"], "doc-42");
        assert_eq!(result["type"], "quality_only");
        assert_eq!(analyzer.name(), "noop");
    }

    #[test]
    fn test_http_analyzer_defaults() {
        let analyzer = HttpAnalyzer::new("http://analysis.local/analyze");
        assert_eq!(analyzer.url(), "http://analysis.local/analyze");
        assert_eq!(
            analyzer.timeout,
            Duration::from_secs(defaults::ANALYSIS_TIMEOUT_SECS)
        );
        assert_eq!(analyzer.name(), "http");
    }

    #[test]
    fn test_http_analyzer_custom_timeout() {
        let analyzer =
            HttpAnalyzer::new("http://analysis.local").with_timeout(Duration::from_secs(5));
        assert_eq!(analyzer.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_analyze_request_wire_format() {
        let body = serde_json::to_value(AnalyzeRequest {
            document_id: "doc-1",
            job_type: JobType::ExtractionOnly,
        })
        .unwrap();
        assert_eq!(body, json!({"documentId": "doc-1", "type": "extraction_only"}));
    }

    #[tokio::test]
    async fn test_http_analyzer_unreachable_is_request_error() {
        // Port 9 (discard) on loopback is not expected to serve HTTP.
        let analyzer = HttpAnalyzer::new("http://127.0.0.1:9/analyze")
            .with_timeout(Duration::from_millis(500));
        let err = analyzer
            .analyze("doc-1", JobType::FullAnalysis)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }
}
