//! Authentication configuration (JWT validation).

use serde::Deserialize;

use super::error::ValidationError;

/// JWT validation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared HS256 secret.
    pub jwt_secret: String,

    /// Accepted issuer, if restricted.
    pub issuer: Option<String>,
}

impl AuthConfig {
    /// Validates the section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jwt_secret.is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__JWT_SECRET"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_secret_is_rejected() {
        let config = AuthConfig {
            jwt_secret: String::new(),
            issuer: None,
        };
        assert!(config.validate().is_err());
    }
}
