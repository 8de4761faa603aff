use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::ServerState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_tasks: usize,
    pub event_subscribers: usize,
    pub emergency_active: bool,
    pub uptime_seconds: u64,
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<Arc<ServerState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let stats = state.tasks.stats();
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_tasks: stats.pending + stats.running,
        event_subscribers: state.tasks.hub().subscriber_count(),
        emergency_active: stats.emergency_active,
        uptime_seconds: state.uptime_seconds(),
    };

    (StatusCode::OK, Json(response))
}
