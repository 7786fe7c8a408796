//! HTTP surface
//!
//! Routes:
//! - `GET /images/:name` - the cached resource (200, 503 try-later, 500 read failure)
//! - `GET /` - service name, version and build commit
//! - `GET /status` - JSON snapshot of the cache entry
//! - `GET /healthz` - liveness
//! - `POST /refresh` - queue a refresh cycle

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::coordinator::{FetchCoordinator, ShutdownSignal};
use crate::constants::server;
use crate::errors::ServerError;

pub mod handlers;

/// Settings for the HTTP listener and responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Seconds advertised in `Retry-After` on 503 responses
    pub retry_after_secs: u64,
    pub content_type: String,
    pub cache_control: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: server::DEFAULT_BIND.to_string(),
            port: server::DEFAULT_PORT,
            retry_after_secs: server::RETRY_AFTER_SECS,
            content_type: server::DEFAULT_CONTENT_TYPE.to_string(),
            cache_control: server::DEFAULT_CACHE_CONTROL.to_string(),
        }
    }
}

impl ServerConfig {
    /// Listen address in `host:port` form
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// State shared by all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub coordinator: Arc<FetchCoordinator>,
    pub config: Arc<ServerConfig>,
    file_name: Arc<str>,
}

impl AppState {
    pub fn new(coordinator: Arc<FetchCoordinator>, config: ServerConfig) -> Self {
        let file_name = coordinator
            .config()
            .cache_file_name()
            .unwrap_or_default()
            .into();

        Self {
            coordinator,
            config: Arc::new(config),
            file_name,
        }
    }

    /// Name under which the cached resource is published
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// Build the router with request tracing
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/images/:name", get(handlers::get_image))
        .route("/status", get(handlers::status))
        .route("/healthz", get(handlers::healthz))
        .route("/refresh", post(handlers::refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address
///
/// # Errors
///
/// Returns `ServerError::Bind` if the address is invalid or in use
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = config.addr();
    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serve `router` on `listener` until `shutdown` fires
///
/// In-flight requests are allowed to finish before this returns.
pub async fn run_server(
    listener: TcpListener,
    router: Router,
    shutdown: ShutdownSignal,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(ServerError::Serve)?;

    info!("HTTP server stopped");
    Ok(())
}
