//! Domain event ingestion for CRM producers

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::websocket::events::DomainEvent;

/// Accept a domain event for fanout
///
/// Fire-and-forget: a 202 only means the event was queued, not delivered.
pub async fn submit_event(State(state): State<AppState>, body: Bytes) -> ApiResult<(StatusCode, Json<Value>)> {
    let event: DomainEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid domain event: {e}")))?;

    if let DomainEvent::LeadStatusChanged { status, .. } = &event {
        if status.trim().is_empty() {
            return Err(ApiError::Validation("status must not be empty".to_string()));
        }
    }

    tracing::debug!(event = ?event, "Domain event accepted");
    state.hub.emit(event);

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}
