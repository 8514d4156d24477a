//! Route table for the chat surface.

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::adapters::http::AppState;

use super::{handlers, sse};

/// Builds the `/chat` router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/chat/session", post(handlers::create_session))
        .route("/chat/message", post(sse::send_message_stream))
        .route("/chat/message/simple", post(handlers::send_message_simple))
        .route("/chat/sessions", get(handlers::list_sessions))
        .route("/chat/sessions/:sid/messages", get(handlers::get_messages))
        .route("/chat/sessions/:sid/context", delete(handlers::clear_context))
        .route("/chat/sessions/:sid/summarize", post(handlers::summarize))
        .route("/chat/sessions/:sid/export", get(handlers::export))
        .route("/chat/sessions/:sid/stats", get(handlers::stats))
}
