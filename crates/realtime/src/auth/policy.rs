//! Topic authorization

use tripdesk_shared::{Role, Topic, UserId};

/// Decides which topics a user may subscribe to
pub trait TopicPolicy: Send + Sync {
    fn can_subscribe(&self, user_id: UserId, role: Role, topic: &Topic) -> bool;
}

/// Default role-based policy
///
/// - `presence`: everyone
/// - `user:<id>`: only the user themselves
/// - `role:<role>`: own role; admins may watch any role
/// - `lead:<id>`: roles that work leads
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleTopicPolicy;

impl TopicPolicy for RoleTopicPolicy {
    fn can_subscribe(&self, user_id: UserId, role: Role, topic: &Topic) -> bool {
        match topic {
            Topic::Presence => true,
            Topic::User(owner) => *owner == user_id,
            Topic::Role(target) => *target == role || role == Role::Admin,
            Topic::Lead(_) => role.handles_leads(),
        }
    }
}
