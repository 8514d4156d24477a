//! HTTP adapter: application state, middleware pipeline, and router
//! assembly.
//!
//! The middleware pipeline, outermost first: request-id (correlation) →
//! trace → CORS → timeout → auth → per-IP rate limit → handlers.

pub mod chat;
pub mod error;
pub mod middleware;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::application::TurnOrchestrator;
use crate::config::ChatConfig;
use crate::domain::foundation::{Clock, SessionId};
use crate::ports::{
    MessageStore, MetricsSink, RateLimiter, SessionStore, TokenValidator, UserStore,
};

use middleware::{auth_middleware, rate_limit_middleware, IpRateLimitState};

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    /// The turn orchestrator.
    pub orchestrator: TurnOrchestrator,
    /// User store (session-creation defaults from preferences).
    pub users: Arc<dyn UserStore>,
    /// Session store (listings, exports).
    pub sessions: Arc<dyn SessionStore>,
    /// Message store (listings, exports).
    pub messages: Arc<dyn MessageStore>,
    /// Bearer-token validator.
    pub validator: Arc<dyn TokenValidator>,
    /// Rate limiter for the per-IP middleware.
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Metrics sink.
    pub metrics: Arc<dyn MetricsSink>,
    /// Clock.
    pub clock: Arc<dyn Clock>,
    /// Chat tuning.
    pub chat: ChatConfig,
}

/// Builds the full application router.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let ip_state = IpRateLimitState {
        limiter: state.rate_limiter.clone(),
        window: state.chat.rate_limit_window(),
        max_requests: state.chat.rate_limit_max_requests,
    };
    let auth_state: middleware::AuthState = state.validator.clone();

    Router::new()
        .merge(chat::routes::routes())
        .route("/ws/chat", get(ws::ws_handler))
        .route("/health", get(health))
        .with_state(state)
        // Innermost first; the last layer added runs first.
        .layer(from_fn_with_state(ip_state, rate_limit_middleware))
        .layer(from_fn_with_state(auth_state, auth_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// `GET /health` - liveness and store connectivity.
async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl IntoResponse {
    // A point lookup exercises store connectivity cheaply.
    let storage_ok = state.sessions.find(&SessionId::new()).await.is_ok();
    let providers = state.orchestrator.registry().probe_all().await;

    let healthy = storage_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "ok" } else { "unhealthy" },
            "storage": storage_ok,
            "providers": providers,
        })),
    )
}
