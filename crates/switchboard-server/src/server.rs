//! Axum HTTP + WebSocket server bootstrap.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::registry::DeviceRegistry;
use crate::session;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<DeviceRegistry>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub start_time: Instant,
    pub active_connections: Arc<AtomicUsize>,
    pub metrics: PrometheusHandle,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to inspect and stop it.
pub async fn start(
    config: ServerConfig,
    metrics_handle: PrometheusHandle,
) -> Result<ServerHandle, ServerError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;

    let state = AppState {
        config: Arc::new(config),
        registry: Arc::new(DeviceRegistry::new()),
        shutdown: Arc::new(ShutdownCoordinator::new()),
        start_time: Instant::now(),
        active_connections: Arc::new(AtomicUsize::new(0)),
        metrics: metrics_handle,
    };
    let registry = Arc::clone(&state.registry);
    let shutdown = Arc::clone(&state.shutdown);

    let router = build_router(state);
    let serve_token = shutdown.token();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { serve_token.cancelled().await })
            .await
            .ok();
    });

    info!(addr = %local_addr, "switchboard server started");

    Ok(ServerHandle {
        addr: local_addr,
        registry,
        shutdown,
        server,
    })
}

/// Handle returned by [`start`] — keeps the listener task alive.
pub struct ServerHandle {
    /// Bound address (useful with port 0).
    pub addr: SocketAddr,
    /// The live device registry, exposed for tests and diagnostics.
    pub registry: Arc<DeviceRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    server: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// The shutdown coordinator driving this server.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Stop the server, draining with a short timeout.
    pub async fn stop(self) {
        self.shutdown
            .graceful_shutdown(vec![self.server], Some(Duration::from_secs(5)))
            .await;
    }
}

/// GET /ws — WebSocket upgrade into a device session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max_message_size = state.config.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| session::run_device_session(socket, state))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.active_connections.load(Ordering::Relaxed);
    let devices = state.registry.len();
    Json(health::health_check(state.start_time, connections, devices))
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    metrics::render(&state.metrics)
}
