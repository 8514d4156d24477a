//! Per-IP rate limiting middleware.
//!
//! Checks the global IP budget through the [`RateLimiter`] port and attaches
//! the standard headers to every response:
//!
//! - `X-RateLimit-Limit` - requests allowed per window
//! - `X-RateLimit-Remaining` - requests left in the current window
//! - `X-RateLimit-Reset` - unix seconds when the window resets
//! - `Retry-After` - only on 429
//!
//! The port is fail-open, so a broken store never refuses traffic here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::domain::foundation::Timestamp;
use crate::ports::{RateDecision, RateKey, RateLimiter};

/// Standard rate limit header names.
pub mod headers {
    use super::HeaderName;

    /// Maximum requests allowed in the window.
    pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
    /// Requests remaining in the current window.
    pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
    /// Unix timestamp when the window resets.
    pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
}

/// Middleware state.
#[derive(Clone)]
pub struct IpRateLimitState {
    /// The rate limiter port.
    pub limiter: Arc<dyn RateLimiter>,
    /// IP window length.
    pub window: Duration,
    /// Requests per IP per window.
    pub max_requests: u32,
}

/// Per-IP rate limiting middleware.
pub async fn rate_limit_middleware(
    State(state): State<IpRateLimitState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ip) = extract_client_ip(&request, connect_info.as_ref()) else {
        // No resolvable client address (tests, unusual transports): pass.
        return next.run(request).await;
    };

    let decision = state
        .limiter
        .check_request(&RateKey::ip(&ip), state.window, state.max_requests)
        .await;

    if !decision.allowed {
        return rate_limit_response(&decision);
    }

    let mut response = next.run(request).await;
    add_rate_limit_headers(&mut response, &decision);
    response
}

/// Extract the client IP, checking forwarded headers first.
///
/// Order of precedence: `X-Forwarded-For` (first entry), `X-Real-IP`, then
/// the socket address.
fn extract_client_ip<B>(
    request: &axum::http::Request<B>,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> Option<String> {
    if let Some(forwarded) = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first_ip) = forwarded.split(',').next() {
            return Some(first_ip.trim().to_string());
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("X-Real-IP")
        .and_then(|h| h.to_str().ok())
    {
        return Some(real_ip.to_string());
    }

    connect_info.map(|ci| ci.0.ip().to_string())
}

/// Builds the 429 response with rate headers and `Retry-After`.
fn rate_limit_response(decision: &RateDecision) -> Response {
    let retry_after = decision.retry_after_secs(Timestamp::now());

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "Too Many Requests",
            "message": "Rate limit exceeded",
            "retryAfterSecs": retry_after,
        })),
    )
        .into_response();

    add_rate_limit_headers(&mut response, decision);
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert("Retry-After", value);
    }

    response
}

/// Attaches the standard X-RateLimit headers.
fn add_rate_limit_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.total.to_string()) {
        headers.insert(headers::X_RATELIMIT_LIMIT.clone(), value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert(headers::X_RATELIMIT_REMAINING.clone(), value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_at.as_unix_secs().to_string()) {
        headers.insert(headers::X_RATELIMIT_RESET.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_ip_from_x_forwarded_for() {
        let request = axum::http::Request::builder()
            .uri("/test")
            .header("X-Forwarded-For", "1.2.3.4, 5.6.7.8")
            .body(())
            .unwrap();

        assert_eq!(extract_client_ip(&request, None), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_ip_prefers_forwarded_over_real_ip() {
        let request = axum::http::Request::builder()
            .uri("/test")
            .header("X-Forwarded-For", "1.2.3.4")
            .header("X-Real-IP", "5.6.7.8")
            .body(())
            .unwrap();

        assert_eq!(extract_client_ip(&request, None), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_ip_returns_none_without_sources() {
        let request = axum::http::Request::builder()
            .uri("/test")
            .body(())
            .unwrap();
        assert_eq!(extract_client_ip(&request, None), None);
    }

    #[test]
    fn denied_response_has_headers_and_retry_after() {
        let decision = RateDecision::denied(Timestamp::now().plus_secs(42), 100, 100);
        let response = rate_limit_response(&decision);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("x-ratelimit-limit"));
        assert!(response.headers().contains_key("x-ratelimit-remaining"));
        assert!(response.headers().contains_key("x-ratelimit-reset"));
        let retry: u64 = response
            .headers()
            .get("Retry-After")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry >= 41 && retry <= 42);
    }

    #[test]
    fn allowed_headers_reflect_decision() {
        let decision = RateDecision::allowed(70, Timestamp::now(), 100, 30);
        let mut response = axum::response::Response::new(axum::body::Body::empty());
        add_rate_limit_headers(&mut response, &decision);

        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "100");
        assert_eq!(
            response.headers().get("x-ratelimit-remaining").unwrap(),
            "70"
        );
    }
}
