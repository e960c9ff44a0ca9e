//! JWT session token validation
//!
//! Tokens are issued by the CRM's session service; this crate only needs the
//! subject and role. Issuing is kept for tests and local tooling.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use tripdesk_shared::{RealtimeError, Role, UserId};

use super::{Identity, IdentityResolver};

/// JWT claims structure for CRM-issued session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Staff role
    pub role: Role,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
    /// Token type (access or refresh)
    pub token_type: TokenType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT manager for token operations
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_hours: i64,
}

impl JwtManager {
    /// Create a new JWT manager
    pub fn new(secret: &str, access_token_expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_expiry_hours,
        }
    }

    /// Generate an access token
    pub fn generate_access_token(&self, user_id: UserId, role: Role) -> Result<String, JwtError> {
        self.generate(user_id, role, TokenType::Access, Duration::hours(self.access_token_expiry_hours))
    }

    fn generate(
        &self,
        user_id: UserId,
        role: Role,
        token_type: TokenType,
        lifetime: Duration,
    ) -> Result<String, JwtError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id.0,
            role,
            iat: now.unix_timestamp(),
            exp: (now + lifetime).unix_timestamp(),
            token_type,
        };

        // Explicit algorithm prevents algorithm confusion attacks
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Validate an access token and return claims
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        let validation = Validation::new(Algorithm::HS256);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid(e.to_string()),
        })?;

        if token_data.claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }
}

impl IdentityResolver for JwtManager {
    fn resolve(&self, credentials: &str) -> Result<Identity, RealtimeError> {
        let claims = self
            .validate_access_token(credentials)
            .map_err(|e| RealtimeError::Authentication(e.to_string()))?;

        Ok(Identity {
            user_id: UserId(claims.sub),
            role: claims.role,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token encoding error: {0}")]
    Encoding(String),
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("Token expired")]
    Expired,
    #[error("Wrong token type")]
    WrongTokenType,
}
