//! Gateway Console
//!
//! Dashboard backend for the AI-API gateway's management API:
//! 1. Drives the GitHub Copilot device authorization flow
//! 2. Serves the gateway config document from a TTL cache that collapses
//!    concurrent fetches into one request
//! 3. Exposes both as a small JSON API plus /health and /metrics

mod api;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{MatchedPath, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use config_store::ConfigStore;
use copilot_auth::{DeviceFlow, DeviceFlowClient};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{HttpTransport, Transport};

use crate::config::Config;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) flow: DeviceFlow,
    pub(crate) config: ConfigStore,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

impl AppState {
    fn new(
        transport: Arc<dyn Transport>,
        copilot_path: &str,
        cache_ttl: Duration,
        prometheus: PrometheusHandle,
    ) -> Self {
        let client = DeviceFlowClient::new(transport.clone()).with_base_path(copilot_path);
        Self {
            flow: DeviceFlow::new(client),
            config: ConfigStore::new(transport, cache_ttl),
            prometheus,
            started_at: Instant::now(),
        }
    }

    /// State backed by `transport` with a recorder that is never installed
    /// globally.
    #[cfg(test)]
    pub(crate) fn for_tests(transport: Arc<dyn Transport>, cache_ttl: Duration) -> Self {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        Self::new(
            transport,
            copilot_auth::DEFAULT_BASE_PATH,
            cache_ttl,
            recorder.handle(),
        )
    }
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds concurrently served requests; excess requests
/// queue rather than fail.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api::routes())
        .layer(axum::middleware::from_fn(track_request))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
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

    info!("starting gateway-console");

    // Install before any engine records a metric
    let prometheus_handle = metrics::install_recorder()?;

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
        listen_addr = %config.console.listen_addr,
        base_url = %config.management.base_url,
        copilot_path = %config.management.copilot_path,
        cache_ttl_secs = config.cache.ttl_secs,
        management_key = config.management.key.is_some(),
        "configuration loaded"
    );

    let http_client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let mut http = HttpTransport::new(http_client, config.management.base_url.clone())
        .with_timeout(Duration::from_secs(config.management.timeout_secs));
    if let Some(key) = config.management.key.clone() {
        http = http.with_management_key(key);
    } else {
        warn!("no management key configured, requests will be sent unauthenticated");
    }
    let transport: Arc<dyn Transport> = Arc::new(http);

    let state = AppState::new(
        transport,
        &config.management.copilot_path,
        config.cache.ttl(),
        prometheus_handle,
    );

    // Best-effort warm up: reconcile Copilot status and prime the cache
    let warmup = state.clone();
    tokio::spawn(async move {
        warmup.flow.check_status().await;
        if let Err(e) = warmup.config.fetch_config(false).await {
            warn!(error = %e, "initial config fetch failed");
        }
    });

    let flow = state.flow.clone();
    let app = build_router(state, config.console.max_connections);

    let listen_addr = config.console.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start
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

    // No further polls once we stop serving
    flow.stop_polling().await;

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Tag every request with an id, record its metrics, and echo the id back in
/// `x-request-id`.
async fn track_request(request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let span = info_span!("request", request_id = %request_id, %method, route = %route);
    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let status = response.status().as_u16();

    metrics::record_request(&route, method.as_str(), status, start.elapsed().as_secs_f64());
    span.in_scope(|| debug!(status, "request handled"));

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Liveness plus a summary of both engines. Always 200: an unreachable
/// management API is reported in the body, not as console failure.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let auth = state.flow.snapshot();
    let view = state.config.snapshot();

    let body = serde_json::json!({
        "status": if view.error.is_some() { "degraded" } else { "healthy" },
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "copilot": {
            "status": auth.status.as_str(),
            "is_polling": auth.is_polling,
        },
        "config": {
            "loaded": view.config.is_some(),
            "loading": view.loading,
            "error": view.error,
        },
    });

    (
        axum::http::StatusCode::OK,
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
