//! handlers.rs — Operator HTTP API for the fleet manager.
//!
//! Thin translation between HTTP and [`FleetController`] operations; no
//! fleet logic lives here. Response types are `Serialize`-only.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use mystfleet_common::FleetError;

use crate::controller::FleetController;
use crate::registry::NodeRecord;

// ════════════════════════════════════════════════════════════════════════════
// APP STATE
// ════════════════════════════════════════════════════════════════════════════

/// Shared application state.
pub struct ManagerAppState {
    pub controller: Arc<FleetController>,
    /// Manager start time (unix timestamp).
    pub start_time: u64,
}

// ════════════════════════════════════════════════════════════════════════════
// REQUEST / RESPONSE TYPES
// ════════════════════════════════════════════════════════════════════════════

/// POST /nodes request
#[derive(Debug, Deserialize)]
pub struct AddNodeReq {
    pub ip: String,
    pub port: u16,
    /// Never stored; exchanged once for a token.
    pub password: String,
}

/// One display row for a registered node.
#[derive(Debug, Serialize)]
pub struct NodeRow {
    pub address: String,
    pub status: String,
    pub uptime: u64,
    pub version: String,
    pub sessions: u64,
    pub earnings: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Whether a live handle is currently attached.
    pub connected: bool,
}

/// GET /nodes response
#[derive(Debug, Serialize)]
pub struct NodeListResp {
    pub count: usize,
    pub nodes: Vec<NodeRow>,
}

/// POST /nodes/refresh response
#[derive(Debug, Serialize)]
pub struct RefreshResp {
    pub refreshed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<RefreshFailure>,
}

#[derive(Debug, Serialize)]
pub struct RefreshFailure {
    pub address: String,
    pub error: String,
}

/// GET /health response
#[derive(Debug, Serialize)]
pub struct ServiceHealthResp {
    pub healthy: bool,
    pub nodes: usize,
    pub uptime_secs: u64,
}

/// Error body for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResp {
    pub error: String,
}

// ════════════════════════════════════════════════════════════════════════════
// HELPERS
// ════════════════════════════════════════════════════════════════════════════

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn node_row(record: &NodeRecord) -> NodeRow {
    NodeRow {
        address: record.address.clone(),
        status: record.status().to_string(),
        uptime: record.health.uptime,
        version: record.health.version.clone(),
        sessions: record.stats.count,
        earnings: record.stats.earnings_display(),
        identity: record.identities.first().map(|i| i.id.clone()),
        connected: record.handle.is_some(),
    }
}

fn error_response(e: &FleetError) -> (StatusCode, Json<ErrorResp>) {
    let status = match e {
        FleetError::Authentication { .. } => StatusCode::UNAUTHORIZED,
        FleetError::Unauthorized { .. } => StatusCode::GONE,
        FleetError::UnknownNode(_) => StatusCode::NOT_FOUND,
        FleetError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
        FleetError::Transport { .. } => StatusCode::BAD_GATEWAY,
        FleetError::Conflict { .. }
        | FleetError::Config(_)
        | FleetError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResp {
            error: e.to_string(),
        }),
    )
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResp>)>;

// ════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ════════════════════════════════════════════════════════════════════════════

/// GET /health
pub async fn health_handler(
    State(app): State<Arc<ManagerAppState>>,
) -> Json<ServiceHealthResp> {
    let nodes = app.controller.registry().read().len();
    Json(ServiceHealthResp {
        healthy: true,
        nodes,
        uptime_secs: now_secs().saturating_sub(app.start_time),
    })
}

/// GET /nodes
pub async fn list_nodes_handler(
    State(app): State<Arc<ManagerAppState>>,
) -> Json<NodeListResp> {
    let registry = app.controller.registry();
    let rows: Vec<NodeRow> = registry
        .read()
        .records_in_order()
        .iter()
        .map(node_row)
        .collect();
    Json(NodeListResp {
        count: rows.len(),
        nodes: rows,
    })
}

/// POST /nodes
pub async fn add_node_handler(
    State(app): State<Arc<ManagerAppState>>,
    Json(req): Json<AddNodeReq>,
) -> ApiResult<NodeRow> {
    let record = app
        .controller
        .add_or_update(&req.ip, req.port, Some(&req.password))
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(node_row(&record)))
}

/// POST /nodes/refresh
pub async fn refresh_all_handler(
    State(app): State<Arc<ManagerAppState>>,
) -> Json<RefreshResp> {
    let outcomes = app.controller.refresh_all().await;
    let mut refreshed = 0;
    let mut failed = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(_) => refreshed += 1,
            Err(e) => failed.push(RefreshFailure {
                address: outcome.address,
                error: e.to_string(),
            }),
        }
    }
    Json(RefreshResp { refreshed, failed })
}

/// POST /nodes/:address/refresh
pub async fn refresh_node_handler(
    State(app): State<Arc<ManagerAppState>>,
    Path(address): Path<String>,
) -> ApiResult<NodeRow> {
    let record = app
        .controller
        .refresh_node(&address)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(node_row(&record)))
}

/// POST /nodes/:address/start
pub async fn start_node_handler(
    State(app): State<Arc<ManagerAppState>>,
    Path(address): Path<String>,
) -> ApiResult<NodeRow> {
    let record = app
        .controller
        .start_node(&address)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(node_row(&record)))
}

/// POST /nodes/:address/stop
pub async fn stop_node_handler(
    State(app): State<Arc<ManagerAppState>>,
    Path(address): Path<String>,
) -> ApiResult<NodeRow> {
    let record = app
        .controller
        .stop_node(&address)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(node_row(&record)))
}

/// DELETE /nodes/:address
pub async fn remove_node_handler(
    State(app): State<Arc<ManagerAppState>>,
    Path(address): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResp>)> {
    app.controller
        .remove_node(&address)
        .map_err(|e| error_response(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn build_router(app_state: Arc<ManagerAppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/nodes", get(list_nodes_handler))
        .route("/nodes", post(add_node_handler))
        .route("/nodes/refresh", post(refresh_all_handler))
        .route("/nodes/:address/refresh", post(refresh_node_handler))
        .route("/nodes/:address/start", post(start_node_handler))
        .route("/nodes/:address/stop", post(stop_node_handler))
        .route("/nodes/:address", delete(remove_node_handler))
        .with_state(app_state)
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
