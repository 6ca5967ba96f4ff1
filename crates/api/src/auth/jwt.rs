//! JWT verification

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("Token has no subject")]
    MissingSubject,
}

/// Claims carried by the auth provider's session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims;
        if claims.sub.trim().is_empty() {
            return Err(JwtError::MissingSubject);
        }
        Ok(claims)
    }
}

/// Mint a token the way the auth provider does.
#[cfg(test)]
pub fn issue_token(secret: &str, sub: &str, email: Option<&str>, ttl_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: sub.to_string(),
        email: email.map(str::to_string),
        exp: time::OffsetDateTime::now_utc().unix_timestamp() + ttl_secs,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-jwt-secret-key-for-testing-only";

    #[test]
    fn test_validate_round_trip() {
        let manager = JwtManager::new(SECRET);
        let token = issue_token(SECRET, "user_1", Some("a@example.com"), 3600);

        let claims = manager.validate(&token).unwrap();
        assert_eq!(claims.sub, "user_1");
        assert_eq!(claims.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let manager = JwtManager::new(SECRET);
        let token = issue_token(SECRET, "user_1", None, -3600);
        assert!(matches!(manager.validate(&token), Err(JwtError::Invalid(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let manager = JwtManager::new(SECRET);
        let token = issue_token("another-secret", "user_1", None, 3600);
        assert!(manager.validate(&token).is_err());
    }

    #[test]
    fn test_empty_subject_rejected() {
        let manager = JwtManager::new(SECRET);
        let token = issue_token(SECRET, " ", None, 3600);
        assert!(matches!(manager.validate(&token), Err(JwtError::MissingSubject)));
    }

    #[test]
    fn test_garbage_rejected() {
        let manager = JwtManager::new(SECRET);
        assert!(manager.validate("not-a-jwt").is_err());
    }
}
