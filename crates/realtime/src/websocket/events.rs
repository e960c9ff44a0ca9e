//! WebSocket event types and serialization
//!
//! Defines the client-to-server commands, the server-to-client envelope and
//! the domain events producers hand to the fanout engine.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use tripdesk_shared::{ConnectionId, LeadId, Role, Topic, UserId};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Commands sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join a conversation-scoped topic (e.g. `lead:42`)
    Subscribe { topic: Topic },

    /// Leave a topic
    Unsubscribe { topic: Topic },

    /// Start typing in a lead conversation
    TypingStart { lead_id: LeadId },

    /// Stop typing in a lead conversation
    TypingStop { lead_id: LeadId },

    /// Heartbeat ping to keep connection alive
    Ping,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events pushed from server to client
///
/// Serialized adjacently tagged so that, flattened into an [`Envelope`], the
/// wire shape is `{"type": ..., "payload": ..., "timestamp": ...}`.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "notification:new")]
    NotificationNew(NotificationPayload),

    #[serde(rename = "lead:status_changed")]
    LeadStatusChanged(LeadStatusPayload),

    #[serde(rename = "message:new")]
    NewMessage(ChatMessagePayload),

    #[serde(rename = "chat:user_typing")]
    UserTyping(TypingPayload),

    #[serde(rename = "presence:changed")]
    PresenceChanged(PresencePayload),

    /// Online users, sent once right after the handshake
    #[serde(rename = "presence:snapshot")]
    PresenceSnapshot { users: Vec<PresencePayload> },

    /// Connection acknowledged
    #[serde(rename = "connected")]
    Connected { connection_id: ConnectionId },

    /// Heartbeat response
    #[serde(rename = "pong")]
    Pong {},

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Wire `type` of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotificationNew(_) => "notification:new",
            Self::LeadStatusChanged(_) => "lead:status_changed",
            Self::NewMessage(_) => "message:new",
            Self::UserTyping(_) => "chat:user_typing",
            Self::PresenceChanged(_) => "presence:changed",
            Self::PresenceSnapshot { .. } => "presence:snapshot",
            Self::Connected { .. } => "connected",
            Self::Pong {} => "pong",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// JSON envelope pushed over the live connection
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: ServerEvent,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Envelope {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            event,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }
}

impl From<ServerEvent> for Envelope {
    fn from(event: ServerEvent) -> Self {
        Self::new(event)
    }
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// In-app notification
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NotificationPayload {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Lead moved between pipeline stages
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LeadStatusPayload {
    pub lead_id: LeadId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    pub status: String,
    pub changed_by: UserId,
}

/// Messaging channel a chat message arrived on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageChannel {
    Whatsapp,
    Instagram,
    Internal,
}

/// Inbox message attached to a lead
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub channel: MessageChannel,
    /// True when the message came from the customer
    pub inbound: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ChatMessagePayload {
    pub lead_id: LeadId,
    pub message: ChatMessage,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TypingPayload {
    pub lead_id: LeadId,
    pub user_id: UserId,
    pub is_typing: bool,
}

/// Online / offline status of a user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub role: Role,
    pub status: PresenceStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen_at: Option<OffsetDateTime>,
}

// =============================================================================
// Domain Events
// =============================================================================

/// Events emitted by CRM producers (lead handlers, message ingestion)
///
/// Transient: they live for a single fanout call and are never persisted.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    LeadStatusChanged {
        lead_id: LeadId,
        actor_id: UserId,
        #[serde(default)]
        previous_status: Option<String>,
        status: String,
    },
    NewMessage {
        lead_id: LeadId,
        assigned_consultant_id: UserId,
        message: ChatMessage,
    },
    TypingState {
        lead_id: LeadId,
        actor_id: UserId,
        is_typing: bool,
    },
    Notification {
        target_user_id: UserId,
        notification: NotificationPayload,
    },
}

impl DomainEvent {
    /// User that caused the event, when there is one
    pub fn actor(&self) -> Option<UserId> {
        match self {
            Self::LeadStatusChanged { actor_id, .. } | Self::TypingState { actor_id, .. } => {
                Some(*actor_id)
            }
            Self::NewMessage { .. } | Self::Notification { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_deserialization() {
        let json = r#"{"type":"subscribe","topic":"lead:42"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::Subscribe { topic } => assert_eq!(topic, Topic::Lead(LeadId(42))),
            _ => panic!("Expected Subscribe event"),
        }

        let event: ClientEvent = serde_json::from_str(r#"{"type":"typing_start","lead_id":9}"#).unwrap();
        assert!(matches!(event, ClientEvent::TypingStart { lead_id: LeadId(9) }));
    }

    #[test]
    fn test_client_event_rejects_bad_topic() {
        let json = r#"{"type":"subscribe","topic":"tickets:1"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::new(ServerEvent::UserTyping(TypingPayload {
            lead_id: LeadId(42),
            user_id: UserId::new(),
            is_typing: true,
        }));

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "chat:user_typing");
        assert_eq!(value["payload"]["lead_id"], 42);
        assert_eq!(value["payload"]["is_typing"], true);

        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(OffsetDateTime::parse(timestamp, &time::format_description::well_known::Rfc3339).is_ok());
    }

    #[test]
    fn test_every_server_event_carries_object_payload() {
        let user_id = UserId::new();
        let presence = PresencePayload {
            user_id,
            role: Role::Consultant,
            status: PresenceStatus::Online,
            last_seen_at: None,
        };

        let events = vec![
            ServerEvent::NotificationNew(NotificationPayload {
                id: Uuid::new_v4(),
                title: "Quote accepted".to_string(),
                body: "Lead 42 accepted the Lisbon quote".to_string(),
                link: None,
            }),
            ServerEvent::LeadStatusChanged(LeadStatusPayload {
                lead_id: LeadId(42),
                previous_status: Some("new".to_string()),
                status: "quoted".to_string(),
                changed_by: user_id,
            }),
            ServerEvent::NewMessage(ChatMessagePayload {
                lead_id: LeadId(42),
                message: ChatMessage {
                    id: Uuid::new_v4(),
                    channel: MessageChannel::Whatsapp,
                    inbound: true,
                    sender_name: None,
                    content: "Is breakfast included?".to_string(),
                    sent_at: OffsetDateTime::now_utc(),
                },
            }),
            ServerEvent::UserTyping(TypingPayload {
                lead_id: LeadId(42),
                user_id,
                is_typing: false,
            }),
            ServerEvent::PresenceChanged(presence.clone()),
            ServerEvent::PresenceSnapshot { users: vec![presence] },
            ServerEvent::Connected {
                connection_id: ConnectionId::new(),
            },
            ServerEvent::Pong {},
            ServerEvent::error("INVALID_EVENT", "Invalid event format"),
        ];

        for event in events {
            let kind = event.kind();
            let value = serde_json::to_value(Envelope::new(event)).unwrap();
            assert_eq!(value["type"], kind);
            assert!(value["payload"].is_object(), "{kind} payload is not an object: {value}");
            assert!(value["timestamp"].is_string());
        }
    }

    #[test]
    fn test_domain_event_deserialization() {
        let actor = UserId::new();
        let json = format!(
            r#"{{"kind":"lead_status_changed","lead_id":5,"actor_id":"{actor}","status":"quoted"}}"#
        );
        let event: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.actor(), Some(actor));
        assert!(matches!(
            event,
            DomainEvent::LeadStatusChanged { previous_status: None, .. }
        ));
    }
}
