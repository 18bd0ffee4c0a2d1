//! Bearer token verification for the WebSocket handshake

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::types::{Identity, UserId};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication token is missing")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Resolves a bearer credential to an identity.
///
/// Called once per connection, before any other session work. A failure is
/// terminal for that connection attempt.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Access token claims as issued by the login service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: UserId,
    pub email: String,
    pub role: String,
    /// Expiry, seconds since the Unix epoch
    pub exp: u64,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            user_id: claims.user_id,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// HS256 JWT verifier sharing its secret with the token issuer
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims.into())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Pull the credential out of the handshake query. Empty counts as missing;
/// anything else goes to the verifier untouched.
pub fn token_from_query(token: Option<&str>) -> Result<&str, AuthError> {
    token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(exp: u64) -> Claims {
        Claims {
            user_id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            role: "user".to_string(),
            exp,
        }
    }

    fn in_one_hour() -> u64 {
        (chrono::Utc::now().timestamp() + 3600) as u64
    }

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let verifier = JwtVerifier::new(SECRET);
        let token = sign(&claims(in_one_hour()), SECRET);

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.email, "u1@example.com");
        assert_eq!(identity.role, "user");
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let token = sign(&claims(in_one_hour()), "another-secret-another-secret-xx");

        assert!(matches!(
            verifier.verify(&token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let expired = (chrono::Utc::now().timestamp() - 3600) as u64;
        let token = sign(&claims(expired), SECRET);

        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(verifier.verify("not.a.jwt").await.is_err());
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(token_from_query(Some("abc")).unwrap(), "abc");
        assert!(matches!(
            token_from_query(None),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            token_from_query(Some("")),
            Err(AuthError::MissingToken)
        ));
        // Padding is left for the verifier to reject
        assert_eq!(token_from_query(Some("  ")).unwrap(), "  ");
        assert_eq!(token_from_query(Some(" abc ")).unwrap(), " abc ");
    }

    #[tokio::test]
    async fn test_padded_token_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let token = format!(" {} ", sign(&claims(in_one_hour()), SECRET));

        let raw = token_from_query(Some(&token)).unwrap();
        assert!(matches!(
            verifier.verify(raw).await,
            Err(AuthError::InvalidToken(_))
        ));
    }
}
