//! HTTP server exposing the metrics and probe endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use eyre::Result;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;

use watcher::HealthStore;

/// Shared state of the probe and metrics handlers.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
    health: Arc<HealthStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("health", &self.health).finish_non_exhaustive()
    }
}

impl AppState {
    /// Create the handler state.
    pub fn new(registry: Arc<Registry>, health: Arc<HealthStore>) -> Self {
        Self { registry, health }
    }
}

/// Build the router: `/` redirects to the metrics endpoint, `/livez`
/// always answers 200, `/readyz` answers 500 until the status watcher
/// marks the collaborators healthy.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::permanent("/metrics") }))
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the server on the given address.
pub async fn run(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = router(state);

    info!(%addr, "starting http server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn livez() -> &'static str {
    "Health OK"
}

async fn readyz(State(state): State<AppState>) -> Response {
    if state.health.is_healthy() {
        (StatusCode::OK, "Health OK").into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Health KO").into_response()
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    let families = state.registry.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("unable to encode metrics: {err}"))
            .into_response();
    }
    ([("content-type", encoder.format_type().to_owned())], buffer).into_response()
}
