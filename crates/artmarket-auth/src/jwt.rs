//! JWT token service
//!
//! HS256 tokens carrying the marketplace identity. The token is the whole
//! identity: there is no user registry behind it, so `sub`, `username` and
//! `role` travel in the claims.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use artmarket_types::{Role, UserId};

use crate::error::{AuthError, AuthResult};

/// Default token lifetime
const DEFAULT_TTL_HOURS: i64 = 24;

/// Token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Display name
    pub username: String,
    /// Marketplace role
    pub role: Role,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

impl Claims {
    /// Parse the subject back into a typed user id
    pub fn user_id(&self) -> AuthResult<UserId> {
        UserId::parse(&self.sub).map_err(|_| AuthError::InvalidToken)
    }
}

/// JWT service for token issuing and validation
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl JwtService {
    /// Create a new JWT service
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        }
    }

    /// Override the token lifetime
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Mint a token for a user
    pub fn issue(&self, user: &UserId, username: &str, role: Role) -> AuthResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.to_string(),
            username: username.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Failed to encode token: {}", e)))
    }

    /// Validate a token and return its claims; expiry is enforced
    pub fn validate(&self, token: &str) -> AuthResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new("test-secret-key-for-jwt-tokens-min-32-bytes!")
    }

    #[test]
    fn test_issue_and_validate() {
        let service = service();
        let user = UserId::new();

        let token = service.issue(&user, "Vera", Role::Artist).unwrap();
        let claims = service.validate(&token).unwrap();

        assert_eq!(claims.user_id().unwrap(), user);
        assert_eq!(claims.username, "Vera");
        assert_eq!(claims.role, Role::Artist);
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = service().with_ttl(Duration::seconds(-120));
        let token = service.issue(&UserId::new(), "Ben", Role::Buyer).unwrap();
        let result = service.validate(&token);
        assert!(matches!(result, Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = service().issue(&UserId::new(), "Ben", Role::Buyer).unwrap();
        let other = JwtService::new("a-completely-different-secret-of-enough-len");
        let result = other.validate(&token);
        assert!(matches!(result, Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let result = service().validate("not-a-jwt");
        assert!(matches!(result, Err(AuthError::InvalidToken)));
    }
}
