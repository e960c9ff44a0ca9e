//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub connections: usize,
    pub rooms: usize,
    pub online_users: usize,
}

/// Health check endpoint with realtime counters
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let stats = state.hub.stats();

    let overall_status = if state.hub.is_shutting_down() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        overall_status,
        Json(HealthResponse {
            status: if overall_status == StatusCode::OK {
                "healthy".to_string()
            } else {
                "shutting_down".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            connections: stats.active_connections,
            rooms: stats.active_rooms,
            online_users: stats.online_users,
        }),
    )
}

/// Liveness check (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness check (stops accepting traffic once shutdown starts)
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.hub.is_shutting_down() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}
