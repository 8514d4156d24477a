//! JWT bearer-token validator.
//!
//! Validates HS256-signed tokens and extracts the principal claims. The
//! identity provider that issues the tokens is an external collaborator; this
//! adapter only checks signature, expiry, and the claims the core consumes.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use crate::domain::foundation::{AuthError, Role, UserId};
use crate::ports::{TokenValidator, ValidatedToken};

/// Claims the core reads from a token.
#[derive(Debug, Deserialize)]
struct Claims {
    /// Subject: the user id.
    sub: String,
    /// Optional role claim; absent means a regular user.
    #[serde(default)]
    role: Option<String>,
    /// Expiry (validated by the library).
    #[allow(dead_code)]
    exp: usize,
}

/// HS256 JWT validator.
pub struct JwtTokenValidator {
    secret: Secret<String>,
    validation: Validation,
}

impl JwtTokenValidator {
    /// Creates a validator for the given shared secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Secret::new(secret.into()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Restricts accepted tokens to the given issuer.
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> Result<ValidatedToken, AuthError> {
        let key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());

        let data = decode::<Claims>(token, &key, &self.validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind as JwtError;
            match e.kind() {
                JwtError::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            }
        })?;

        let user_id = UserId::new(data.claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let role = match data.claims.role.as_deref() {
            Some("admin") => Role::Admin,
            _ => Role::User,
        };

        Ok(ValidatedToken { user_id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        exp: usize,
    }

    const SECRET: &str = "test-secret";

    fn sign(claims: &TestClaims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> usize {
        (chrono::Utc::now().timestamp() + 3_600) as usize
    }

    #[tokio::test]
    async fn accepts_valid_token() {
        let validator = JwtTokenValidator::new(SECRET);
        let token = sign(&TestClaims {
            sub: "user-123".to_string(),
            role: None,
            exp: future_exp(),
        });

        let validated = validator.validate(&token).await.unwrap();
        assert_eq!(validated.user_id.as_str(), "user-123");
        assert_eq!(validated.role, Role::User);
    }

    #[tokio::test]
    async fn extracts_admin_role() {
        let validator = JwtTokenValidator::new(SECRET);
        let token = sign(&TestClaims {
            sub: "admin-1".to_string(),
            role: Some("admin".to_string()),
            exp: future_exp(),
        });

        let validated = validator.validate(&token).await.unwrap();
        assert_eq!(validated.role, Role::Admin);
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let validator = JwtTokenValidator::new(SECRET);
        let token = sign(&TestClaims {
            sub: "user-123".to_string(),
            role: None,
            exp: (chrono::Utc::now().timestamp() - 3_600) as usize,
        });

        let err = validator.validate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn rejects_wrong_signature() {
        let validator = JwtTokenValidator::new("different-secret");
        let token = sign(&TestClaims {
            sub: "user-123".to_string(),
            role: None,
            exp: future_exp(),
        });

        let err = validator.validate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let validator = JwtTokenValidator::new(SECRET);
        let err = validator.validate("not.a.jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
