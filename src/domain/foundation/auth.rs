//! Authentication types for the domain layer.
//!
//! These types represent an already-validated principal extracted from a JWT.
//! They have no provider dependencies; any token validator can populate them
//! via the `TokenValidator` port.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{CorrelationId, UserId};

/// Role of an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular chat user.
    User,
    /// Administrative access (quota resets, session inspection).
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

/// Already-validated principal handed to the core on every request.
#[derive(Debug, Clone)]
pub struct Principal {
    /// The unique user identifier from the auth provider.
    pub user_id: UserId,
    /// The principal's role.
    pub role: Role,
    /// Correlation id for this request, propagated to every log entry.
    pub correlation_id: CorrelationId,
}

impl Principal {
    /// Creates a new principal.
    pub fn new(user_id: UserId, role: Role, correlation_id: CorrelationId) -> Self {
        Self {
            user_id,
            role,
            correlation_id,
        }
    }

    /// Returns true for administrative principals.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Authentication errors that can occur during token validation.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The token is missing, malformed, or has an invalid signature.
    #[error("Invalid or expired token")]
    InvalidToken,

    /// The token has expired (separate from InvalidToken for specific handling).
    #[error("Token expired")]
    TokenExpired,

    /// No Authorization header was supplied on a protected route.
    #[error("Missing authentication token")]
    MissingToken,

    /// The authentication service is unavailable (network, config, etc.).
    #[error("Auth service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal::new(
            UserId::new("user-1").unwrap(),
            role,
            CorrelationId::from_string("corr-1"),
        )
    }

    #[test]
    fn default_role_is_user() {
        assert_eq!(Role::default(), Role::User);
    }

    #[test]
    fn admin_detection() {
        assert!(principal(Role::Admin).is_admin());
        assert!(!principal(Role::User).is_admin());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }
}
