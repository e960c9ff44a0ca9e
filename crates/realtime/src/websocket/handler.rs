//! WebSocket handler for Axum
//!
//! Authenticates the handshake, then pumps frames between the socket and the
//! client session.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::state::AppState;

use super::events::Envelope;
use super::session::ClientSession;

/// How long the writer gets to flush queued events after the session ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// Upgrade to a WebSocket once the query token resolves to an identity
///
/// Credentials are checked before the upgrade so a bad token gets a plain 401.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    if state.hub.is_shutting_down() {
        return Err(ApiError::ServiceUnavailable);
    }

    let Some(token) = params.token.filter(|token| !token.is_empty()) else {
        tracing::warn!("WebSocket handshake without credentials rejected");
        return Err(ApiError::Unauthorized);
    };

    let mut session = ClientSession::new(state.hub.clone());
    let identity = session.authenticate(state.resolver.as_ref(), &token)?;

    let Some(ws) = ws else {
        return Err(ApiError::BadRequest("WebSocket upgrade required".to_string()));
    };

    tracing::info!(user_id = %identity.user_id, role = %identity.role, "WebSocket connection upgrade requested");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session)))
}

/// Drive one authenticated socket until either side closes
async fn handle_socket(socket: WebSocket, mut session: ClientSession) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let conn = match session.activate(tx) {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket session could not be activated");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    let connection_id = conn.id;

    // Writer: drains the connection's outbound queue in order
    let mut send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, event_type = envelope.kind(), "Failed to serialize WebSocket event");
                }
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            // Reaped, shut down or unregistered elsewhere
            _ = conn.closed() => {
                tracing::debug!(connection_id = %connection_id, "Connection closed by server");
                break;
            }
            _ = &mut send_task => {
                tracing::debug!(connection_id = %connection_id, "WebSocket writer stopped");
                break;
            }
            frame = stream.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(Message::Text(text)) => {
                        session.heartbeat();
                        session.handle_text(&text);
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                        break;
                    }
                    Ok(_) => session.heartbeat(),
                    Err(e) => {
                        tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket transport error");
                        break;
                    }
                }
            }
        }
    }

    // Dropping the last handles on the connection ends the writer
    session.close();
    drop(conn);
    drop(session);

    if !send_task.is_finished() {
        match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!(connection_id = %connection_id, "WebSocket writer did not drain in time");
                send_task.abort();
            }
        }
    }
}
