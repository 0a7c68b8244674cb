//! Cellforge API Server implementation
//!
//! HTTP REST API server using Axum. Serves sheet and cell reads, cell writes,
//! subscription creation and the subscription feed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers;
use crate::core::SheetEngine;
use crate::external::{HttpExternalRef, DEFAULT_TIMEOUT};
use crate::store::MemoryStore;

/// Preflight responses may be cached by clients for a day
const CORS_MAX_AGE: Duration = Duration::from_secs(86_400);

/// API Server configuration
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Bound on each `EXTERNAL_REF` fetch
    pub external_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            external_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ApiConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: SheetEngine,
    /// Cancelled on shutdown; every request works under a child token
    pub shutdown: CancellationToken,
    /// Host used for webhook URLs when the request carries no `Host` header
    pub public_host: String,
    pub version: String,
}

impl AppState {
    pub fn new(engine: SheetEngine, public_host: impl Into<String>) -> Self {
        Self {
            engine,
            shutdown: CancellationToken::new(),
            public_host: public_host.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Build the router with all routes and middleware
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(CORS_MAX_AGE);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/sub/:subscription_id", get(handlers::subscription_feed))
        .route("/api/v1/:sheet_id", get(handlers::get_sheet))
        .route(
            "/api/v1/:sheet_id/:cell_id",
            get(handlers::get_cell).post(handlers::upsert_cell),
        )
        .route(
            "/api/v1/:sheet_id/:cell_id/subscribe",
            post(handlers::subscribe_cell),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Run the API server
pub async fn run_api_server(config: ApiConfig) -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cellforge=info,tower_http=info".into()),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {}", e))?;

    let external = HttpExternalRef::new(config.external_timeout)?;
    let engine = SheetEngine::new(Arc::new(MemoryStore::new()), Arc::new(external));
    let state = Arc::new(AppState::new(engine, config.address()));
    let shutdown = state.shutdown.clone();

    let app = router(state);

    let addr: SocketAddr = config.address().parse()?;
    info!("Cellforge API Server starting on http://{}", addr);
    info!("   Endpoints: /api/v1/:sheet_id[/:cell_id[/subscribe]], /api/v1/sub/:subscription_id");
    info!(
        "   Health: /health, external reference timeout: {:?}",
        config.external_timeout
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Cellforge API Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Cancels `shutdown` so open subscription feeds end and the server can drain.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server...");
    shutdown.cancel();
}
