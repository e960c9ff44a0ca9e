//! Authentication and topic authorization for realtime connections

pub mod jwt;
pub mod middleware;
pub mod policy;

pub use jwt::{Claims, JwtError, JwtManager, TokenType};
pub use middleware::{require_auth, require_internal_token, INTERNAL_TOKEN_HEADER};
pub use policy::{RoleTopicPolicy, TopicPolicy};

use tripdesk_shared::{RealtimeError, Role, UserId};

/// Who is on the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

/// Resolves handshake credentials to an identity
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, credentials: &str) -> Result<Identity, RealtimeError>;
}
