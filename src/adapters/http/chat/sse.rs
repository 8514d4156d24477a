//! SSE streaming turn endpoint.
//!
//! `POST /chat/message` - admission failures surface as plain HTTP errors
//! before the stream starts; an admitted turn streams
//! `data: <JSON>` events (`token`, then a terminal `done` or `error`) and
//! ends the response after the terminal event. A client disconnect closes
//! the subscription; the turn keeps running so the assistant message still
//! reaches a terminal status.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Json,
};
use futures::Stream;

use crate::adapters::http::error::ApiError;
use crate::adapters::http::middleware::RequirePrincipal;
use crate::adapters::http::AppState;
use crate::application::{relay, CancelFlag, DEFAULT_RELAY_CAPACITY};
use crate::domain::foundation::{CoreError, SessionId};

use super::dto::SendMessageRequest;

/// `POST /chat/message` - streaming turn over SSE.
pub async fn send_message_stream(
    State(state): State<AppState>,
    RequirePrincipal(principal): RequirePrincipal,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id: SessionId = body
        .session_id
        .parse()
        .map_err(|_| CoreError::validation("sessionId", "Session id must be a UUID"))?;

    let turn = state
        .orchestrator
        .admit(&principal, session_id, &body.message, body.provider.as_deref())
        .await?;

    let (sender, mut receiver) = relay(DEFAULT_RELAY_CAPACITY, state.metrics.clone());
    tokio::spawn(turn.run(sender, CancelFlag::new()));

    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        Box::pin(async_stream::stream! {
            while let Some(event) = receiver.recv().await {
                let terminal = event.is_terminal();
                match serde_json::to_string(&event) {
                    Ok(json) => yield Ok(Event::default().data(json)),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize turn event");
                    }
                }
                if terminal {
                    break;
                }
            }
        });

    Ok((
        [
            ("Cache-Control", "no-cache"),
            ("Connection", "keep-alive"),
            ("Access-Control-Allow-Origin", "*"),
        ],
        Sse::new(stream),
    ))
}
