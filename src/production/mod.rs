mod pipeline;
mod kafka_source;
mod scrape_server;

pub use pipeline::{ingest_queue, IngestPipeline, PipelineStats, DEFAULT_QUEUE_CAPACITY};
pub use kafka_source::{
    client_config, Backoff, KafkaSource, LoggingContext, SourceError, SourceStats,
    MAX_CONSECUTIVE_ERRORS,
};
pub use scrape_server::{bind, router, serve, ServeError, SHUTDOWN_GRACE};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Resolve on SIGINT, SIGTERM or SIGHUP
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sighup) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(term), Ok(hup)) => (term, hup),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to listen for SIGTERM/SIGHUP: {}", e);
                return std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sighup.recv() => {}
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Cancel `token` once a shutdown signal arrives
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("shutdown signal received");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}
