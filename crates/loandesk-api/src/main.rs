//! loandesk-api binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use loandesk_api::telemetry::{init_tracing, LogSettings};
use loandesk_api::{router, AppState};
use loandesk_jobs::{
    defaults, DocumentAnalyzer, HttpAnalyzer, NoOpAnalyzer, Scheduler, SchedulerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_settings = LogSettings::from_env();
    let _log_guard = init_tracing(&log_settings);
    info!(
        log_format = log_settings.format_name(),
        log_file = ?log_settings.file,
        "Logging initialized"
    );

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| defaults::SERVER_PORT.to_string())
        .parse()
        .unwrap_or(defaults::SERVER_PORT);

    let analyzer: Arc<dyn DocumentAnalyzer> = match HttpAnalyzer::from_env() {
        Some(http) => {
            info!(url = %http.url(), "Using HTTP analysis backend");
            Arc::new(http)
        }
        None => {
            warn!("ANALYSIS_URL not set, documents will be acknowledged without analysis");
            Arc::new(NoOpAnalyzer::new())
        }
    };

    let config = SchedulerConfig::from_env();
    info!(
        global_max_concurrent = ?config.global_max_concurrent,
        max_batch_size = config.max_batch_size,
        retention_secs = config.retention.as_secs(),
        "Scheduler configured"
    );
    let scheduler = Scheduler::new(config, analyzer);
    let sweeper = scheduler.start_sweeper();

    let app = router(AppState::new(scheduler));

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.shutdown().await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
