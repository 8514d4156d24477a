//! Token validation port.
//!
//! Validates a bearer token and yields the principal. The HTTP middleware
//! and the WebSocket `auth` frame both go through this seam, keeping them
//! provider-agnostic.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, Role, UserId};

/// Claims extracted from a validated token.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    /// The authenticated user.
    pub user_id: UserId,
    /// The user's role.
    pub role: Role,
}

/// Port for bearer-token validation.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validates a bearer token, returning its claims.
    async fn validate(&self, token: &str) -> Result<ValidatedToken, AuthError>;
}
