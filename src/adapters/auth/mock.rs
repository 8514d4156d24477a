//! Mock token validator for tests.
//!
//! Accepts tokens of the form `user:<id>` or `admin:<id>`; everything else
//! is invalid.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, Role, UserId};
use crate::ports::{TokenValidator, ValidatedToken};

/// Mock validator mapping well-formed test tokens to principals.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockTokenValidator;

impl MockTokenValidator {
    /// Creates the mock validator.
    pub fn new() -> Self {
        Self
    }

    /// Builds a token the validator will accept for the given user.
    pub fn token_for(user_id: &str) -> String {
        format!("user:{}", user_id)
    }

    /// Builds an admin token the validator will accept.
    pub fn admin_token_for(user_id: &str) -> String {
        format!("admin:{}", user_id)
    }
}

#[async_trait]
impl TokenValidator for MockTokenValidator {
    async fn validate(&self, token: &str) -> Result<ValidatedToken, AuthError> {
        let (role, id) = token
            .split_once(':')
            .ok_or(AuthError::InvalidToken)?;

        let role = match role {
            "user" => Role::User,
            "admin" => Role::Admin,
            _ => return Err(AuthError::InvalidToken),
        };

        let user_id = UserId::new(id).map_err(|_| AuthError::InvalidToken)?;
        Ok(ValidatedToken { user_id, role })
    }
}
