//! Per-connection session lifecycle
//!
//! A [`ClientSession`] binds one socket to the hub: it resolves the
//! handshake credentials, registers the connection, answers client commands
//! and releases everything when it is closed or dropped.

use std::sync::Arc;

use tokio::sync::mpsc;

use tripdesk_shared::{RealtimeError, Topic};

use crate::auth::{Identity, IdentityResolver};

use super::connection::Connection;
use super::events::{ClientEvent, DomainEvent, Envelope, ServerEvent};
use super::hub::RealtimeHub;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    /// Authentication failed; never becomes active
    Rejected,
    Closing,
    Closed,
}

pub struct ClientSession {
    hub: RealtimeHub,
    connection: Option<Arc<Connection>>,
    identity: Option<Identity>,
    state: SessionState,
}

impl ClientSession {
    pub fn new(hub: RealtimeHub) -> Self {
        Self {
            hub,
            connection: None,
            identity: None,
            state: SessionState::Connecting,
        }
    }

    /// Authenticate and activate in one step
    pub fn establish(
        hub: RealtimeHub,
        resolver: &dyn IdentityResolver,
        credentials: &str,
        sender: mpsc::UnboundedSender<Envelope>,
    ) -> Result<Self, RealtimeError> {
        let mut session = Self::new(hub);
        session.authenticate(resolver, credentials)?;
        session.activate(sender)?;
        Ok(session)
    }

    /// Resolve handshake credentials; a failure moves the session to `Rejected`
    pub fn authenticate(
        &mut self,
        resolver: &dyn IdentityResolver,
        credentials: &str,
    ) -> Result<Identity, RealtimeError> {
        if self.state != SessionState::Connecting {
            return Err(RealtimeError::Authentication(format!(
                "session is {:?}, not connecting",
                self.state
            )));
        }

        match resolver.resolve(credentials) {
            Ok(identity) => {
                self.identity = Some(identity);
                Ok(identity)
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket authentication rejected");
                self.state = SessionState::Rejected;
                Err(e)
            }
        }
    }

    /// Register the connection and greet the client
    ///
    /// Standard topics are (re)subscribed by the hub on every activation.
    pub fn activate(&mut self, sender: mpsc::UnboundedSender<Envelope>) -> Result<Arc<Connection>, RealtimeError> {
        let identity = match (self.state, self.identity) {
            (SessionState::Connecting, Some(identity)) => identity,
            (state, _) => {
                return Err(RealtimeError::Authentication(format!(
                    "cannot activate a session in state {state:?}"
                )));
            }
        };

        let conn = self.hub.connect(identity, sender);
        self.connection = Some(Arc::clone(&conn));
        self.state = SessionState::Active;

        let _ = conn.send_event(ServerEvent::Connected { connection_id: conn.id });
        let _ = conn.send_event(ServerEvent::PresenceSnapshot {
            users: self.hub.presence_snapshot(),
        });

        Ok(conn)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }

    /// Any inbound frame counts as a heartbeat
    pub fn heartbeat(&self) {
        if let Some(conn) = &self.connection {
            self.hub.touch_heartbeat(&conn.id);
        }
    }

    /// Handle a raw text frame, replying with an error envelope on failure
    pub fn handle_text(&mut self, text: &str) {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse client event");
                self.reply(ServerEvent::error("INVALID_EVENT", "Invalid event format"));
                return;
            }
        };

        if let Err(e) = self.handle(event) {
            tracing::debug!(error = %e, "Client command refused");
            self.reply(ServerEvent::error(e.code(), e.to_string()));
        }
    }

    /// Apply one client command
    ///
    /// Clients may only manage conversation-scoped topics; the standard
    /// topics are owned by the session.
    pub fn handle(&mut self, event: ClientEvent) -> Result<(), RealtimeError> {
        let conn = self.active_connection()?;

        match event {
            ClientEvent::Subscribe { topic } => {
                ensure_conversation_scoped(&topic)?;
                self.hub.subscribe(&conn.id, topic)?;
                tracing::debug!(connection_id = %conn.id, topic = %topic, "Subscribed to topic");
            }

            ClientEvent::Unsubscribe { topic } => {
                ensure_conversation_scoped(&topic)?;
                self.hub.unsubscribe(&conn.id, &topic);
            }

            ClientEvent::TypingStart { lead_id } | ClientEvent::TypingStop { lead_id } => {
                let is_typing = matches!(event, ClientEvent::TypingStart { .. });
                let topic = Topic::Lead(lead_id);
                if !self.hub.is_subscribed(&conn.id, &topic) {
                    return Err(RealtimeError::Authorization {
                        topic: topic.to_string(),
                    });
                }
                self.hub.emit(DomainEvent::TypingState {
                    lead_id,
                    actor_id: conn.user_id,
                    is_typing,
                });
            }

            ClientEvent::Ping => {
                self.hub.touch_heartbeat(&conn.id);
                let _ = conn.send_event(ServerEvent::Pong {});
            }
        }

        Ok(())
    }

    /// Release the connection; idempotent
    pub fn close(&mut self) {
        match self.state {
            SessionState::Closing | SessionState::Closed => return,
            SessionState::Connecting | SessionState::Rejected => {
                self.state = SessionState::Closed;
                return;
            }
            SessionState::Active => {}
        }

        self.state = SessionState::Closing;
        if let Some(conn) = &self.connection {
            self.hub.disconnect(&conn.id);
            tracing::info!(connection_id = %conn.id, user_id = %conn.user_id, "WebSocket session closed");
        }
        self.state = SessionState::Closed;
    }

    fn active_connection(&self) -> Result<Arc<Connection>, RealtimeError> {
        match (&self.connection, self.state) {
            (Some(conn), SessionState::Active) if conn.is_active() => Ok(Arc::clone(conn)),
            _ => Err(RealtimeError::Transport("session is not active".to_string())),
        }
    }

    fn reply(&self, event: ServerEvent) {
        if let Some(conn) = &self.connection {
            let _ = conn.send_event(event);
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn ensure_conversation_scoped(topic: &Topic) -> Result<(), RealtimeError> {
    if topic.is_conversation_scoped() {
        Ok(())
    } else {
        Err(RealtimeError::Authorization {
            topic: topic.to_string(),
        })
    }
}
