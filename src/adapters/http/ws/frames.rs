//! Frame grammar for the bidirectional binding.
//!
//! Client → server: `auth`, `chat`, `ping`, `cancel`.
//! Server → client: `auth_success`, `auth_error`, `pong`, and the turn
//! events (`token`, `done`, `error`) with a `sessionId` field added.
//! Unauthenticated or malformed frames yield
//! `{"type":"error","message":"Invalid message type or not authenticated"}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::TurnEvent;

/// Frames received from the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame of a connection: bearer token.
    Auth { token: String },
    /// One turn.
    #[serde(rename_all = "camelCase")]
    Chat {
        session_id: String,
        message: String,
        provider_override: Option<String>,
    },
    /// Heartbeat.
    Ping,
    /// Cancel the in-flight turn.
    Cancel,
}

/// Control frames sent to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Authentication accepted.
    AuthSuccess,
    /// Authentication refused; the connection closes after this frame.
    AuthError { message: String },
    /// Heartbeat response.
    Pong,
    /// Protocol error (unauthenticated or malformed frame).
    Error { message: String },
}

impl ServerFrame {
    /// The canonical rejection for unauthenticated or malformed frames.
    pub fn invalid() -> Self {
        ServerFrame::Error {
            message: "Invalid message type or not authenticated".to_string(),
        }
    }

    /// Serialises the frame to its wire text.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("server frame serializes")
    }
}

/// Serialises a turn event with the `sessionId` field the binding adds.
pub fn turn_event_text(event: &TurnEvent, session_id: &str) -> String {
    let mut value = serde_json::to_value(event).expect("turn event serializes");
    if let Value::Object(ref mut map) = value {
        map.insert("sessionId".to_string(), Value::String(session_id.to_string()));
    }
    value.to_string()
}
