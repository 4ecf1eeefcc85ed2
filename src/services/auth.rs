use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims expected in an upload bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

/// Identity extracted from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub user_id: String,
    pub email: Option<String>,
}

/// HS256 bearer-token verifier.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        })
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(VerifiedUser {
            user_id: data.claims.sub,
            email: data.claims.email,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("JWT secret must not be empty")]
    EmptySecret,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, exp: i64) -> String {
        let claims = Claims {
            sub: "user-42".to_string(),
            email: Some("ada@example.com".to_string()),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn in_one_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_valid_token_yields_identity() {
        let verifier = TokenVerifier::new("s3cret").unwrap();
        let user = verifier.verify(&token("s3cret", in_one_hour())).unwrap();
        assert_eq!(user.user_id, "user-42");
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let verifier = TokenVerifier::new("s3cret").unwrap();
        assert!(verifier.verify(&token("other", in_one_hour())).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let verifier = TokenVerifier::new("s3cret").unwrap();
        let expired = chrono::Utc::now().timestamp() - 3600;
        assert!(verifier.verify(&token("s3cret", expired)).is_err());
    }

    #[test]
    fn test_empty_secret_is_refused() {
        assert!(matches!(TokenVerifier::new(""), Err(AuthError::EmptySecret)));
    }
}
