//! Auth Gateway
//!
//! Single-binary Rust service that:
//! 1. Receives identity-provider sign-in callbacks and exchanges the
//!    authorization code for a session on the backend
//! 2. Issues and redeems single-use verification codes for password reset
//!    and email verification
//! 3. Sweeps expired codes on an interval

mod attempts;
mod auth;
mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{MatchedPath, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use backend::{HttpBackend, MemoryBackend, Notifier, SessionExchange, SubjectDirectory};
use oauth_callback::Orchestrator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{Instrument, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verification::{FilePersistence, MemoryPersistence, TokenPersistence, TokenStore};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::attempts::AttemptRegistry;
use crate::config::Config;

/// Maximum time to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    orchestrator: Arc<Orchestrator>,
    attempts: Arc<AttemptRegistry>,
    tokens: Arc<TokenStore>,
    /// Backend base URL; `None` when running without a backend
    backend_url: Option<String>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .merge(auth::routes())
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route_layer(axum::middleware::from_fn(track_request))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Tag each request with an id, time it, and echo the id back.
async fn track_request(matched: MatchedPath, request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let route = matched.as_str().to_owned();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        route = %route,
    );

    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let elapsed = start.elapsed();

    metrics::record_request(&route, elapsed.as_secs_f64());
    span.in_scope(|| {
        info!(
            status = response.status().as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "request completed"
        );
    });

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting auth-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        backend = config.backend.as_ref().map(|b| b.base_url.as_str()).unwrap_or("none"),
        landing_path = %config.exchange.landing_path,
        "configuration loaded"
    );

    let (exchange, directory, notifier, backend_url): (
        Option<Arc<dyn SessionExchange>>,
        Arc<dyn SubjectDirectory>,
        Arc<dyn Notifier>,
        Option<String>,
    ) = match &config.backend {
        Some(backend_config) => {
            let backend = Arc::new(
                HttpBackend::new(
                    backend_config.base_url.clone(),
                    backend_config.api_key.clone(),
                    backend_config.timeout(),
                )
                .context("failed to build backend client")?,
            );
            if backend_config.api_key.is_none() {
                warn!("no backend API key configured, calling backend unauthenticated");
            }
            (
                Some(backend.clone() as Arc<dyn SessionExchange>),
                backend.clone() as Arc<dyn SubjectDirectory>,
                backend as Arc<dyn Notifier>,
                Some(backend_config.base_url.clone()),
            )
        }
        None => {
            // No accounts to look up: requests issue nothing, callbacks fail
            // with a configuration error
            warn!("no backend configured, sign-in and verification codes are unavailable");
            let empty = Arc::new(MemoryBackend::new());
            (
                None,
                empty.clone() as Arc<dyn SubjectDirectory>,
                empty as Arc<dyn Notifier>,
                None,
            )
        }
    };

    let persistence: Arc<dyn TokenPersistence> = match &config.tokens.path {
        Some(path) => Arc::new(
            FilePersistence::load(path.clone())
                .await
                .with_context(|| format!("failed to load token file {}", path.display()))?,
        ),
        None => {
            info!("no token path configured, keeping verification codes in memory");
            Arc::new(MemoryPersistence::new())
        }
    };

    let tokens = Arc::new(TokenStore::new(persistence, directory, notifier));
    let _sweeper = verification::spawn_sweep_task(
        tokens.clone(),
        config.tokens.sweep_interval(),
        metrics::record_swept,
    );

    let orchestrator =
        Orchestrator::new(exchange).with_landing_path(config.exchange.landing_path.clone());

    let app_state = AppState {
        orchestrator: Arc::new(orchestrator),
        attempts: Arc::new(AttemptRegistry::default()),
        tokens,
        backend_url,
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: 200 when a backend is configured, 503 when degraded.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();

    let (status_code, body) = match &state.backend_url {
        Some(_) => (
            axum::http::StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "backend": "configured",
                "uptime_seconds": uptime,
            }),
        ),
        None => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "degraded",
                "backend": "not_configured",
                "uptime_seconds": uptime,
            }),
        ),
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
