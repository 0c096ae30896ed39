//! HTTP API
//!
//! Thin JSON layer over the [`Steward`] for front ends:
//! - chain listing
//! - start / stop requests (answered immediately, the work runs in the background)
//! - per-chain status and log text
//! - log stream selection

pub mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::steward::Steward;

pub type SharedState = Arc<Steward>;

/// Create the API router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/chains", get(routes::api_chains))
        .route("/api/nodes", get(routes::api_nodes))
        .route("/api/nodes/:chain/start", post(routes::api_start))
        .route("/api/nodes/:chain/stop", post(routes::api_stop))
        .route("/api/nodes/:chain/status", get(routes::api_status))
        .route("/api/nodes/:chain/logs", get(routes::api_logs))
        .route("/api/select/:chain", post(routes::api_select))
        .route("/api/selected/logs", get(routes::api_selected_logs))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    state: SharedState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
