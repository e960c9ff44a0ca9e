//! Common types used across Tripdesk

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::RealtimeError;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Live connection ID wrapper
///
/// Assigned server-side when a socket registers; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lead ID wrapper (CRM primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub i64);

impl From<i64> for LeadId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Staff role inside a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Consultant,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Consultant => "consultant",
            Self::Viewer => "viewer",
        }
    }

    /// Whether this role works lead conversations
    pub fn handles_leads(&self) -> bool {
        matches!(self, Self::Admin | Self::Manager | Self::Consultant)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "consultant" => Ok(Self::Consultant),
            "viewer" => Ok(Self::Viewer),
            other => Err(RealtimeError::InvalidRole(other.to_string())),
        }
    }
}

// =============================================================================
// Topics
// =============================================================================

/// Named broadcast channel
///
/// Rendered on the wire as `user:<uuid>`, `lead:<id>`, `role:<role>` or
/// `presence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    User(UserId),
    Lead(LeadId),
    Role(Role),
    Presence,
}

impl Topic {
    /// Conversation-scoped topics are the only ones clients join and leave
    /// explicitly after the handshake.
    pub fn is_conversation_scoped(&self) -> bool {
        matches!(self, Self::Lead(_))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Lead(id) => write!(f, "lead:{id}"),
            Self::Role(role) => write!(f, "role:{role}"),
            Self::Presence => f.write_str("presence"),
        }
    }
}

impl FromStr for Topic {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "presence" {
            return Ok(Self::Presence);
        }

        let invalid = || RealtimeError::InvalidTopic(s.to_string());
        let (kind, id) = s.split_once(':').ok_or_else(invalid)?;

        match kind {
            "user" => Uuid::parse_str(id)
                .map(|uuid| Self::User(UserId(uuid)))
                .map_err(|_| invalid()),
            "lead" => id
                .parse::<i64>()
                .map(|lead| Self::Lead(LeadId(lead)))
                .map_err(|_| invalid()),
            "role" => id.parse::<Role>().map(Self::Role).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_display_and_parse() {
        let user = UserId::new();
        let topics = [
            Topic::User(user),
            Topic::Lead(LeadId(42)),
            Topic::Role(Role::Consultant),
            Topic::Presence,
        ];

        for topic in topics {
            let rendered = topic.to_string();
            assert_eq!(rendered.parse::<Topic>().unwrap(), topic);
        }

        assert_eq!(Topic::Lead(LeadId(42)).to_string(), "lead:42");
        assert_eq!(Topic::Role(Role::Consultant).to_string(), "role:consultant");
    }

    #[test]
    fn test_invalid_topics_rejected() {
        for raw in ["", "lead", "lead:abc", "user:not-a-uuid", "role:pilot", "room:1"] {
            let result = raw.parse::<Topic>();
            assert!(
                matches!(result, Err(RealtimeError::InvalidTopic(_))),
                "expected {raw:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_topic_serde_uses_wire_string() {
        let json = serde_json::to_string(&Topic::Lead(LeadId(7))).unwrap();
        assert_eq!(json, r#""lead:7""#);

        let topic: Topic = serde_json::from_str(r#""role:admin""#).unwrap();
        assert_eq!(topic, Topic::Role(Role::Admin));
    }

    #[test]
    fn test_only_lead_topics_are_conversation_scoped() {
        assert!(Topic::Lead(LeadId(1)).is_conversation_scoped());
        assert!(!Topic::Presence.is_conversation_scoped());
        assert!(!Topic::Role(Role::Admin).is_conversation_scoped());
        assert!(!Topic::User(UserId::new()).is_conversation_scoped());
    }

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Consultant.handles_leads());
        assert!(Role::Admin.handles_leads());
        assert!(!Role::Viewer.handles_leads());
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Manager);
    }

    #[test]
    fn test_unknown_role_is_a_role_error() {
        let err = "pilot".parse::<Role>().unwrap_err();
        assert_eq!(err, RealtimeError::InvalidRole("pilot".to_string()));
        assert_eq!(err.code(), "INVALID_ROLE");

        // Inside a topic the same input is still a topic error
        assert!(matches!(
            "role:pilot".parse::<Topic>(),
            Err(RealtimeError::InvalidTopic(_))
        ));
    }
}
