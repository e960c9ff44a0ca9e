//! Request authentication middleware

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the shared secret for producer ingestion
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Resolve a bearer token and attach the caller's [`Identity`](super::Identity)
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;
    let identity = state.resolver.resolve(token)?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Only trusted producers holding the internal token may pass
pub async fn require_internal_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if !constant_time_compare(presented, &state.config.internal_events_token) {
        tracing::warn!("Rejected internal event submission with a bad token");
        return Err(ApiError::InvalidToken);
    }

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Constant-time comparison that also hides where the strings differ
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        // Same amount of work as a real comparison
        let _ = a.as_bytes().ct_eq(a.as_bytes());
        return false;
    }

    a.as_bytes().ct_eq(b.as_bytes()).into()
}
