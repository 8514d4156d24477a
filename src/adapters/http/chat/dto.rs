//! Wire DTOs for the chat HTTP surface.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;
use crate::domain::message::{Message, MessageRole, MessageStatus};
use crate::domain::session::Session;

/// Request body for `POST /chat/session`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Response body for `POST /chat/session`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub settings: SettingsDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Request body for `POST /chat/message` and `/chat/message/simple`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub session_id: String,
    pub message: String,
    /// Optional provider override for this turn.
    pub provider: Option<String>,
}

/// Query for `GET /chat/sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

/// Response body for `GET /chat/sessions`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionDto>,
    pub total: u64,
}

/// Query for `GET /chat/sessions/:sid/messages`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<u32>,
}

/// Response body for `GET /chat/sessions/:sid/messages`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub session_id: String,
    pub messages: Vec<MessageDto>,
    pub session: SessionDto,
}

/// Response body for `POST /chat/message/simple`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleMessageResponse {
    pub success: bool,
    pub user_message: MessageDto,
    pub assistant_message: MessageDto,
}

/// Query for `DELETE /chat/sessions/:sid/context`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearContextQuery {
    #[serde(default = "default_keep_system")]
    pub keep_system: bool,
}

impl Default for ClearContextQuery {
    fn default() -> Self {
        Self {
            keep_system: default_keep_system(),
        }
    }
}

fn default_keep_system() -> bool {
    true
}

/// Query for `GET /chat/sessions/:sid/export`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".to_string()
}

/// Sampling settings in wire form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDto {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Session context counters in wire form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDto {
    pub total_tokens: u64,
    pub message_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summarised_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_hash: Option<String>,
}

/// Session in wire form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    pub session_id: String,
    pub title: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub settings: SettingsDto,
    pub context: ContextDto,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl From<&Session> for SessionDto {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id().to_string(),
            title: session.title().to_string(),
            provider: session.provider().to_string(),
            model: session.model().map(String::from),
            system_prompt: session.system_prompt().map(String::from),
            settings: SettingsDto {
                temperature: session.settings().temperature,
                max_tokens: session.settings().max_tokens,
            },
            context: ContextDto {
                total_tokens: session.context().total_tokens,
                message_count: session.context().message_count,
                last_summarised_at: session.context().last_summarised_at,
                summary_hash: session.context().summary_hash.clone(),
            },
            is_active: session.is_active(),
            created_at: session.created_at(),
            last_activity_at: session.last_activity_at(),
        }
    }
}

/// Message metadata in wire form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadataDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub token_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<crate::application::WireUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub is_streaming: bool,
    pub streaming_complete: bool,
}

/// Message error in wire form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageErrorDto {
    pub message: String,
    pub code: String,
    pub retryable: bool,
}

/// Message in wire form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub metadata: MessageMetadataDto,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageErrorDto>,
    pub created_at: Timestamp,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id().to_string(),
            session_id: message.session_id().to_string(),
            role: message.role(),
            content: message.content().to_string(),
            metadata: MessageMetadataDto {
                provider: message.metadata().provider.clone(),
                model: message.metadata().model.clone(),
                token_count: message.metadata().token_count,
                usage: message.metadata().usage.map(Into::into),
                response_time: message.metadata().response_time_ms,
                correlation_id: message
                    .metadata()
                    .correlation_id
                    .as_ref()
                    .map(|c| c.as_str().to_string()),
                is_streaming: message.metadata().is_streaming,
                streaming_complete: message.metadata().streaming_complete,
            },
            status: message.status(),
            error: message.error().map(|e| MessageErrorDto {
                message: e.message.clone(),
                code: e.code.clone(),
                retryable: e.retryable,
            }),
            created_at: message.created_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{CorrelationId, SessionId, UserId};
    use crate::domain::session::SessionSettings;

    #[test]
    fn session_dto_round_trips_fields() {
        let session = Session::new(
            UserId::new("u1").unwrap(),
            "mock",
            Some("mock-model-1".to_string()),
            Some("Be kind.".to_string()),
            SessionSettings::default(),
            Timestamp::now(),
        );

        let dto = SessionDto::from(&session);
        assert_eq!(dto.session_id, session.id().to_string());
        assert_eq!(dto.provider, "mock");
        assert_eq!(dto.model.as_deref(), Some("mock-model-1"));
        assert!(dto.is_active);

        let json = serde_json::to_value(&dto).unwrap();
        assert!(json.get("sessionId").is_some());
        assert!(json.get("lastActivityAt").is_some());
    }

    #[test]
    fn message_dto_serializes_role_and_status_lowercase() {
        let message = Message::user(
            SessionId::new(),
            UserId::new("u1").unwrap(),
            "hello",
            CorrelationId::new(),
            Timestamp::now(),
        );

        let json = serde_json::to_value(MessageDto::from(&message)).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["metadata"]["tokenCount"], 2);
    }

    #[test]
    fn send_message_request_accepts_camel_case() {
        let json = r#"{"sessionId":"550e8400-e29b-41d4-a716-446655440000","message":"Hi","provider":"mock"}"#;
        let req: SendMessageRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.message, "Hi");
        assert_eq!(req.provider.as_deref(), Some("mock"));
    }
}
