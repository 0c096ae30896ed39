//! API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::warn;

use super::SharedState;
use crate::catalog::ChainCatalog;
use crate::node::NodeStatus;
use crate::registry::NodeSummary;

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct ChainListing {
    pub chain_name: String,
    pub pretty_name: String,
    pub chain_id: String,
    pub daemon_name: String,
    pub status: NodeStatus,
}

/// GET /api/chains
pub async fn api_chains(State(state): State<SharedState>) -> Json<Vec<ChainListing>> {
    let mut listings = Vec::new();
    for chain in state.catalog().live_mainnets() {
        listings.push(ChainListing {
            status: state.status(&chain.chain_name).await,
            chain_name: chain.chain_name.clone(),
            pretty_name: chain.display_name().to_string(),
            chain_id: chain.chain_id.clone(),
            daemon_name: chain.daemon_name.clone(),
        });
    }
    Json(listings)
}

/// GET /api/nodes
pub async fn api_nodes(State(state): State<SharedState>) -> Json<Vec<NodeSummary>> {
    Json(state.nodes().await)
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub chain: String,
    pub action: &'static str,
}

/// POST /api/nodes/:chain/start
pub async fn api_start(
    State(state): State<SharedState>,
    Path(chain): Path<String>,
) -> Result<(StatusCode, Json<Accepted>), (StatusCode, String)> {
    if state.catalog().chain(&chain).is_none() {
        return Err((StatusCode::NOT_FOUND, format!("unknown chain: {}", chain)));
    }

    let handle = state.request_start(&chain);
    let name = chain.clone();
    tokio::spawn(async move {
        if let Ok(Err(e)) = handle.await {
            warn!(chain = %name, error = %e, "Start request failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            chain,
            action: "start",
        }),
    ))
}

/// POST /api/nodes/:chain/stop
pub async fn api_stop(
    State(state): State<SharedState>,
    Path(chain): Path<String>,
) -> (StatusCode, Json<Accepted>) {
    let handle = state.request_stop(&chain);
    let name = chain.clone();
    tokio::spawn(async move {
        if let Ok(Err(e)) = handle.await {
            warn!(chain = %name, error = %e, "Stop request failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(Accepted {
            chain,
            action: "stop",
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub chain: String,
    pub status: NodeStatus,
    /// Human readable status, e.g. "Not running"
    pub display: String,
}

/// GET /api/nodes/:chain/status
pub async fn api_status(
    State(state): State<SharedState>,
    Path(chain): Path<String>,
) -> Json<StatusResponse> {
    let status = state.status(&chain).await;
    Json(StatusResponse {
        chain,
        status,
        display: status.to_string(),
    })
}

/// GET /api/nodes/:chain/logs
pub async fn api_logs(
    State(state): State<SharedState>,
    Path(chain): Path<String>,
) -> Result<String, StatusCode> {
    state.log(&chain).ok_or(StatusCode::NOT_FOUND)
}

/// POST /api/select/:chain
pub async fn api_select(
    State(state): State<SharedState>,
    Path(chain): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .select(&chain)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}

#[derive(Debug, Serialize)]
pub struct SelectedLogs {
    pub chain: String,
    pub logs: String,
}

/// GET /api/selected/logs
pub async fn api_selected_logs(
    State(state): State<SharedState>,
) -> Result<Json<SelectedLogs>, StatusCode> {
    let (chain, logs) = state.selected_log().await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(SelectedLogs { chain, logs }))
}
