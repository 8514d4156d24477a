//! Authentication middleware and extractor.
//!
//! Validates Bearer tokens through the [`TokenValidator`] port and injects a
//! [`Principal`] (with the request's correlation id) into the request
//! extensions. Routes enforce authentication with the [`RequirePrincipal`]
//! extractor; requests without a token pass through un-principaled so public
//! routes keep working.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::domain::foundation::{AuthError, CorrelationId, Principal};
use crate::ports::TokenValidator;

/// State for the auth middleware.
pub type AuthState = Arc<dyn TokenValidator>;

/// Reads the correlation id set by the request-id layer, or mints one.
fn correlation_from_request(request: &Request) -> CorrelationId {
    request
        .headers()
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(CorrelationId::from_string)
        .unwrap_or_default()
}

/// Bearer-token middleware.
///
/// 1. Extracts the token from the `Authorization: Bearer …` header.
/// 2. Validates it through the `TokenValidator` port.
/// 3. On success, injects `Principal` into the request extensions.
/// 4. Without a token, continues un-principaled.
/// 5. On an invalid token, returns 401 (403 for expired tokens).
pub async fn auth_middleware(
    State(validator): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_owned);

    let Some(token) = token else {
        return next.run(request).await;
    };

    match validator.validate(&token).await {
        Ok(validated) => {
            let correlation_id = correlation_from_request(&request);
            let principal = Principal::new(validated.user_id, validated.role, correlation_id);
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => {
            let (status, message) = match &e {
                AuthError::TokenExpired => (StatusCode::FORBIDDEN, "Token expired"),
                AuthError::ServiceUnavailable(msg) => {
                    tracing::error!("Auth service unavailable: {}", msg);
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Authentication service unavailable",
                    )
                }
                _ => (StatusCode::FORBIDDEN, "Invalid token"),
            };

            (
                status,
                Json(serde_json::json!({
                    "error": message,
                    "code": "AUTH_ERROR"
                })),
            )
                .into_response()
        }
    }
}

/// Extractor that requires an authenticated principal.
#[derive(Debug, Clone)]
pub struct RequirePrincipal(pub Principal);

/// Rejection for missing authentication.
#[derive(Debug)]
pub struct AuthRejection;

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Authentication required",
                "code": "AUTH_REQUIRED"
            })),
        )
            .into_response()
    }
}

impl<S> axum::extract::FromRequestParts<S> for RequirePrincipal
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut axum::http::request::Parts,
        _state: &'life1 S,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            parts
                .extensions
                .get::<Principal>()
                .cloned()
                .map(RequirePrincipal)
                .ok_or(AuthRejection)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_prefers_request_id_header() {
        let request = Request::builder()
            .uri("/chat/message")
            .header("x-request-id", "req-42")
            .body(axum::body::Body::empty())
            .unwrap();

        assert_eq!(correlation_from_request(&request).as_str(), "req-42");
    }

    #[test]
    fn correlation_is_minted_without_header() {
        let request = Request::builder()
            .uri("/chat/message")
            .body(axum::body::Body::empty())
            .unwrap();

        assert!(!correlation_from_request(&request).as_str().is_empty());
    }
}
