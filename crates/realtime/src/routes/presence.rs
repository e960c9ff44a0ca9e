//! Presence queries for the dashboard

use axum::{extract::State, Extension, Json};
use serde::Serialize;

use tripdesk_shared::UserId;

use crate::auth::Identity;
use crate::state::AppState;
use crate::websocket::events::PresencePayload;

#[derive(Debug, Serialize)]
pub struct OnlineUsersResponse {
    pub users: Vec<UserId>,
    pub count: usize,
}

/// Users currently shown online
pub async fn online_users(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Json<OnlineUsersResponse> {
    let mut users: Vec<UserId> = state.hub.online_users().into_iter().collect();
    users.sort();

    tracing::debug!(user_id = %identity.user_id, online = users.len(), "Online users requested");

    Json(OnlineUsersResponse {
        count: users.len(),
        users,
    })
}

/// Full presence snapshot including last-seen times
pub async fn snapshot(State(state): State<AppState>) -> Json<Vec<PresencePayload>> {
    Json(state.hub.presence_snapshot())
}
