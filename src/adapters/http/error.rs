//! HTTP error mapping.
//!
//! Translates [`CoreError`] kinds to status codes and `{error, message, …}`
//! bodies. 429 responses always carry `Retry-After`.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::domain::foundation::{AuthError, CoreError, ErrorKind};

/// API-level error, convertible into a response.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation | ErrorKind::SafetyBlock => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::QuotaExceeded | ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ProviderError | ErrorKind::StorageError | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_label(&self) -> &'static str {
        match self.0.kind() {
            ErrorKind::Validation => "Bad Request",
            ErrorKind::SafetyBlock => "Content flagged",
            ErrorKind::Unauthenticated => "Unauthorized",
            ErrorKind::NotFound => "Not Found",
            ErrorKind::RateLimited => "Too Many Requests",
            ErrorKind::QuotaExceeded => "Quota Exceeded",
            _ => "Internal Server Error",
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let kind = match err {
            AuthError::ServiceUnavailable(_) => ErrorKind::Internal,
            _ => ErrorKind::Unauthenticated,
        };
        Self(CoreError::new(kind, err.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(kind = %self.0.kind(), error = %self.0.message, "request failed");
        } else {
            tracing::warn!(kind = %self.0.kind(), error = %self.0.message, "request rejected");
        }

        let mut body = serde_json::json!({
            "error": self.error_label(),
            "message": self.0.message,
            "code": self.0.kind().as_str(),
            "retryable": self.0.is_retryable(),
        });

        // Safety blocks surface the matched flags.
        if let Some(flags) = self.0.details.get("flags") {
            body["flags"] = serde_json::json!(flags
                .split(',')
                .filter(|f| !f.is_empty())
                .collect::<Vec<_>>());
        }

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = self
                .0
                .details
                .get("retry_after_secs")
                .cloned()
                .unwrap_or_else(|| "60".to_string());
            if let Ok(value) = HeaderValue::from_str(&retry_after) {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        let cases = [
            (CoreError::validation("content", "bad"), StatusCode::BAD_REQUEST),
            (CoreError::not_found("gone"), StatusCode::NOT_FOUND),
            (
                CoreError::new(ErrorKind::RateLimited, "slow down"),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                CoreError::new(ErrorKind::QuotaExceeded, "done for today"),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                CoreError::new(ErrorKind::Unauthenticated, "who"),
                StatusCode::UNAUTHORIZED,
            ),
            (CoreError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let err = CoreError::new(ErrorKind::RateLimited, "Too Many Requests")
            .with_detail("retry_after_secs", "30");
        let response = ApiError(err).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "30");
    }

    #[test]
    fn rate_limited_response_defaults_retry_after() {
        let err = CoreError::new(ErrorKind::RateLimited, "Too Many Requests");
        let response = ApiError(err).into_response();
        assert_eq!(response.headers().get("Retry-After").unwrap(), "60");
    }

    #[test]
    fn auth_errors_map_to_unauthorized() {
        let api: ApiError = AuthError::InvalidToken.into();
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
    }
}
