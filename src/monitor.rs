// context-bridge -- read-only monitoring endpoints
//
// Health, readiness and stats for whoever watches the bridge process.
// Nothing here mutates the bridge.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::bridge::Bridge;
use crate::state::BridgeState;
use crate::stats::StatsSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub app: String,
    pub state: BridgeState,
    pub uptime_seconds: u64,
    pub endpoint: String,
    pub last_message_at: Option<i64>,
    pub last_heartbeat_ack_at: Option<i64>,
}

pub fn router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/health/ready", get(readiness))
        .route("/api/bridge/stats", get(stats))
        .with_state(bridge)
}

/// GET /api/health -- always 200; `status` reflects the bridge state.
pub async fn health(State(bridge): State<Arc<Bridge>>) -> Json<HealthResponse> {
    let state = bridge.state().await;
    let stats = bridge.stats();
    let status = match state {
        BridgeState::Connected => "ok",
        BridgeState::Initializing | BridgeState::Connecting | BridgeState::Reconnecting => "degraded",
        BridgeState::Stopping | BridgeState::Disconnected | BridgeState::Error => "down",
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        app: "context-bridge".to_string(),
        state,
        uptime_seconds: bridge.uptime_secs(),
        endpoint: bridge.config().endpoint.clone(),
        last_message_at: stats.last_message_at,
        last_heartbeat_ack_at: stats.last_heartbeat_ack_at,
    })
}

/// GET /api/health/ready -- 200 only while `Connected`.
pub async fn readiness(State(bridge): State<Arc<Bridge>>) -> Response {
    let state = bridge.state().await;
    let ready = state == BridgeState::Connected;
    let body = json!({ "ready": ready, "state": state });
    if ready {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

/// GET /api/bridge/stats
pub async fn stats(State(bridge): State<Arc<Bridge>>) -> Json<StatsSnapshot> {
    Json(bridge.stats())
}
