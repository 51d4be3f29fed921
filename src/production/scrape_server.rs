//! Scrape endpoint
//!
//! Serves the store snapshot in the Prometheus text format on one configured
//! path. Every other path is a 404.

use crate::clock::Clock;
use crate::metrics::{render, RenderOptions, SeriesStore, CONTENT_TYPE};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long in-flight scrapes may run after shutdown is requested
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub enum ServeError {
    Bind { addr: SocketAddr, source: std::io::Error },
    Io(std::io::Error),
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeError::Bind { addr, source } => {
                write!(f, "failed to bind scrape endpoint on {}: {}", addr, source)
            }
            ServeError::Io(e) => write!(f, "scrape server error: {}", e),
        }
    }
}

impl std::error::Error for ServeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServeError::Bind { source, .. } => Some(source),
            ServeError::Io(e) => Some(e),
        }
    }
}

struct ScrapeState<C: Clock> {
    store: Arc<SeriesStore<C>>,
    options: RenderOptions,
}

/// Router exposing the store at `path`
pub fn router<C: Clock>(store: Arc<SeriesStore<C>>, path: &str, options: RenderOptions) -> Router {
    debug_assert!(path.starts_with('/'), "scrape path must be absolute");
    Router::new()
        .route(path, get(scrape::<C>))
        .with_state(Arc::new(ScrapeState { store, options }))
}

async fn scrape<C: Clock>(State(state): State<Arc<ScrapeState<C>>>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();
    let body = render(snapshot.iter().map(|(_, sample)| sample), state.options);
    debug!(series = snapshot.len(), bytes = body.len(), "served scrape");
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}

/// Bind the scrape listener on all interfaces
pub async fn bind(port: u16) -> Result<TcpListener, ServeError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })
}

/// Serve until `shutdown` is cancelled, then allow [`SHUTDOWN_GRACE`] for
/// in-flight requests before closing.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<(), ServeError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "scrape endpoint listening");
    }

    let graceful = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .into_future();
    let mut server = std::pin::pin!(server);

    tokio::select! {
        result = &mut server => result.map_err(ServeError::Io),
        _ = shutdown.cancelled() => {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                Ok(result) => {
                    info!("scrape endpoint stopped");
                    result.map_err(ServeError::Io)
                }
                Err(_) => {
                    warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "scrape endpoint closed with requests in flight");
                    Ok(())
                }
            }
        }
    }
}
