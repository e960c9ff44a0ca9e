//! HTTP routes

pub mod events;
pub mod health;
pub mod presence;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::{require_auth, require_internal_token},
    error::ApiError,
    state::AppState,
    websocket::ws_handler,
};

/// Domain events are small JSON documents
const MAX_EVENT_BODY_BYTES: usize = 256 * 1024;

/// Create all routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Bearer-authenticated API routes
    let protected_api_routes = Router::new()
        .route("/presence", get(presence::snapshot))
        .route("/presence/online", get(presence::online_users))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // WebSocket routes (auth handled in handler via query parameter)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    let api_v1_routes = Router::new()
        .merge(protected_api_routes)
        .merge(websocket_routes);

    // Producer ingestion (shared internal token, not user JWTs)
    let internal_routes = Router::new()
        .route("/events", post(events::submit_event))
        .layer(middleware::from_fn_with_state(state.clone(), require_internal_token))
        .layer(DefaultBodyLimit::max(MAX_EVENT_BODY_BYTES));

    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .nest("/internal", internal_routes)
        .fallback(|| async { ApiError::NotFound })
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Any origin when none are configured, otherwise the listed ones
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(allowed)
}
