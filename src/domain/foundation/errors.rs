//! Error types for the domain layer.
//!
//! Every failure the turn orchestrator can observe maps to one
//! [`ErrorKind`]; the transports translate kinds to HTTP status codes and
//! wire frames.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors that occur during value object construction.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' must be between {min} and {max}, got {actual}")]
    OutOfRange {
        field: String,
        min: f64,
        max: f64,
        actual: f64,
    },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField {
            field: field.into(),
        }
    }

    /// Creates an out of range validation error.
    pub fn out_of_range(field: impl Into<String>, min: f64, max: f64, actual: f64) -> Self {
        ValidationError::OutOfRange {
            field: field.into(),
            min,
            max,
            actual,
        }
    }

    /// Creates an invalid format validation error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure classification for everything the orchestrator can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Schema or range validation failure on inbound data.
    Validation,
    /// Missing or invalid principal.
    Unauthenticated,
    /// Session (or other entity) not found or not owned by the caller.
    NotFound,
    /// User daily token or request quota exhausted.
    QuotaExceeded,
    /// Rate limiter rejected the request.
    RateLimited,
    /// Inbound content screen flagged above the block threshold.
    SafetyBlock,
    /// Provider adapter failure or turn timeout.
    ProviderError,
    /// Storage failure.
    StorageError,
    /// Any other uncaught failure.
    Internal,
}

impl ErrorKind {
    /// Returns the stable string code used in wire responses and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::SafetyBlock => "SAFETY_BLOCK",
            ErrorKind::ProviderError => "PROVIDER_ERROR",
            ErrorKind::StorageError => "STORAGE_ERROR",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Returns true if the caller may usefully retry.
    ///
    /// Quota rejections become retryable only after the daily reset, so they
    /// report false here.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::ProviderError
                | ErrorKind::StorageError
                | ErrorKind::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Standard core error with kind, message, and optional details.
#[derive(Debug, Clone)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl CoreError {
    /// Creates a new core error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Creates a validation error for a specific field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message).with_detail("field", field)
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageError, message)
    }

    /// Creates a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderError, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Adds a detail to the error.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if the caller may usefully retry.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for CoreError {}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        CoreError::new(ErrorKind::Validation, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_codes_are_stable() {
        assert_eq!(ErrorKind::Validation.as_str(), "VALIDATION");
        assert_eq!(ErrorKind::QuotaExceeded.as_str(), "QUOTA_EXCEEDED");
        assert_eq!(ErrorKind::SafetyBlock.as_str(), "SAFETY_BLOCK");
        assert_eq!(ErrorKind::ProviderError.as_str(), "PROVIDER_ERROR");
    }

    #[test]
    fn retryable_classification() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::ProviderError.is_retryable());
        assert!(ErrorKind::Internal.is_retryable());

        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::SafetyBlock.is_retryable());
        assert!(!ErrorKind::QuotaExceeded.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
    }

    #[test]
    fn core_error_carries_details() {
        let err = CoreError::validation("content", "Message content too long")
            .with_detail("max", "4000");

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.details.get("field").unwrap(), "content");
        assert_eq!(err.details.get("max").unwrap(), "4000");
    }

    #[test]
    fn core_error_display_includes_kind() {
        let err = CoreError::not_found("Session not found");
        assert_eq!(err.to_string(), "[NOT_FOUND] Session not found");
    }

    #[test]
    fn validation_error_converts_to_core_error() {
        let err: CoreError = ValidationError::empty_field("title").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message.contains("title"));
    }
}
