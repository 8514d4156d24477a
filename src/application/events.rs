//! Turn events and outcomes.
//!
//! [`TurnEvent`] is the wire shape shared by both transport bindings: SSE
//! serialises each event as a `data:` line, the WebSocket binding adds a
//! `sessionId` field. [`TurnOutcome`] is the orchestrator's return value;
//! transports translate it to status codes and terminal frames.

use serde::Serialize;

use crate::domain::foundation::{CoreError, MessageId};
use crate::domain::message::{Message, TokenUsage};

/// Token usage in wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<TokenUsage> for WireUsage {
    fn from(usage: TokenUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// One event relayed from the orchestrator to a subscribed client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TurnEvent {
    /// A streamed text fragment, in adapter order.
    #[serde(rename_all = "camelCase")]
    Token {
        content: String,
        message_id: MessageId,
    },
    /// Terminal: the turn completed (possibly with fallback content).
    #[serde(rename_all = "camelCase")]
    Done {
        message_id: MessageId,
        usage: WireUsage,
        response_time: u64,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        fallback: bool,
    },
    /// Terminal: the turn failed before producing an assistant message, or
    /// was cancelled.
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
    },
}

impl TurnEvent {
    /// Returns true for `done` and `error` events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Done { .. } | TurnEvent::Error { .. })
    }
}

/// The persisted record of a finished turn.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    /// The persisted user message.
    pub user_message: Message,
    /// The persisted assistant message (terminal status).
    pub assistant_message: Message,
    /// Wall-clock from admission to terminal event.
    pub response_time_ms: u64,
}

/// Discriminated result of [`handle_turn`](super::TurnOrchestrator::handle_turn).
#[derive(Debug)]
pub enum TurnOutcome {
    /// The provider answered; the assistant message is `Completed`.
    Completed(TurnRecord),
    /// The provider failed; a canned safe response was substituted. The
    /// assistant message is `Completed` with the cause captured.
    Fallback(TurnRecord, CoreError),
    /// The client cancelled mid-stream; the assistant message is `Cancelled`
    /// with the partial content.
    Cancelled(TurnRecord),
    /// The terminal store write failed; the assistant message was driven to
    /// `Error` with a second write instead.
    Failed(TurnRecord, CoreError),
    /// The turn was refused at admission; nothing was persisted.
    Rejected(CoreError),
}

impl TurnOutcome {
    /// Returns the rejection error, if this turn was refused.
    pub fn rejection(&self) -> Option<&CoreError> {
        match self {
            TurnOutcome::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_event_wire_shape() {
        let id = MessageId::new();
        let event = TurnEvent::Token {
            content: "Hel".to_string(),
            message_id: id,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["content"], "Hel");
        assert_eq!(json["messageId"], id.to_string());
    }

    #[test]
    fn done_event_omits_fallback_when_false() {
        let event = TurnEvent::Done {
            message_id: MessageId::new(),
            usage: TokenUsage::new(10, 5).into(),
            response_time: 120,
            fallback: false,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"done\""));
        assert!(json.contains("\"responseTime\":120"));
        assert!(json.contains("\"totalTokens\":15"));
        assert!(!json.contains("fallback"));
    }

    #[test]
    fn done_event_includes_fallback_when_true() {
        let event = TurnEvent::Done {
            message_id: MessageId::new(),
            usage: TokenUsage::zero().into(),
            response_time: 5,
            fallback: true,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"fallback\":true"));
    }

    #[test]
    fn error_event_message_id_is_optional() {
        let event = TurnEvent::Error {
            message: "Too Many Requests".to_string(),
            retryable: true,
            message_id: None,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"retryable\":true"));
        assert!(!json.contains("messageId"));
    }

    #[test]
    fn terminal_classification() {
        assert!(!TurnEvent::Token {
            content: "x".to_string(),
            message_id: MessageId::new()
        }
        .is_terminal());
        assert!(TurnEvent::Error {
            message: "x".to_string(),
            retryable: false,
            message_id: None
        }
        .is_terminal());
    }
}
