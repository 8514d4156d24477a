//! Message entity - one half of a turn.
//!
//! Assistant messages are created with `status = Streaming` before the first
//! token flows and transition exactly once to a terminal status. The stores
//! enforce the transition with a compare-and-set so replayed completions are
//! no-ops.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    CoreError, CorrelationId, ErrorKind, MessageId, SessionId, Timestamp, UserId,
};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input.
    User,
    /// Model response.
    Assistant,
    /// System instructions (position 0 of a session).
    System,
    /// Compressed replacement for a contiguous older prefix.
    Summary,
}

/// Lifecycle of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Created but not yet streaming (assistant only).
    Pending,
    /// Tokens are flowing.
    Streaming,
    /// Terminal: content and usage are final.
    Completed,
    /// Terminal: the turn failed; `error` holds the cause.
    Error,
    /// Terminal: the client cancelled mid-stream.
    Cancelled,
}

impl MessageStatus {
    /// Returns true for statuses that accept no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Error | MessageStatus::Cancelled
        )
    }
}

/// Token usage reported by a provider for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Total tokens (prompt + completion).
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Creates new token usage.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Creates zero usage.
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Captured cause for a message in `Error` status (or a fallback completion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageError {
    /// Human-readable message.
    pub message: String,
    /// Stable error code (an [`ErrorKind`] string).
    pub code: String,
    /// Whether the client may usefully re-send the turn.
    pub retryable: bool,
}

impl MessageError {
    /// Captures a core error.
    pub fn from_core(err: &CoreError) -> Self {
        Self {
            message: err.message.clone(),
            code: err.kind().as_str().to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Per-message metadata recorded alongside the content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Provider that produced an assistant message.
    pub provider: Option<String>,
    /// Model that produced an assistant message.
    pub model: Option<String>,
    /// Authoritative token count for this message.
    pub token_count: u32,
    /// Full usage as reported by the provider (assistant messages).
    pub usage: Option<TokenUsage>,
    /// Wall-clock from admission to terminal event, in milliseconds.
    pub response_time_ms: Option<u64>,
    /// Correlation id of the originating turn.
    pub correlation_id: Option<CorrelationId>,
    /// True while the message is being streamed.
    pub is_streaming: bool,
    /// True once the stream reached its terminal frame.
    pub streaming_complete: bool,
}

/// Estimates a token count for text when the provider reports none.
///
/// `ceil(len / 4)` over bytes, the conventional rough cut.
pub fn estimate_tokens(content: &str) -> u32 {
    (content.len().div_ceil(4)) as u32
}

/// Message entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    session_id: SessionId,
    user_id: UserId,
    role: MessageRole,
    content: String,
    metadata: MessageMetadata,
    status: MessageStatus,
    error: Option<MessageError>,
    created_at: Timestamp,
}

impl Message {
    /// Creates a completed user message.
    pub fn user(
        session_id: SessionId,
        user_id: UserId,
        content: impl Into<String>,
        correlation_id: CorrelationId,
        now: Timestamp,
    ) -> Self {
        let content = content.into();
        let token_count = estimate_tokens(&content);
        Self {
            id: MessageId::new(),
            session_id,
            user_id,
            role: MessageRole::User,
            content,
            metadata: MessageMetadata {
                token_count,
                correlation_id: Some(correlation_id),
                ..Default::default()
            },
            status: MessageStatus::Completed,
            error: None,
            created_at: now,
        }
    }

    /// Creates a completed system message.
    pub fn system(
        session_id: SessionId,
        user_id: UserId,
        content: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        let content = content.into();
        let token_count = estimate_tokens(&content);
        Self {
            id: MessageId::new(),
            session_id,
            user_id,
            role: MessageRole::System,
            content,
            metadata: MessageMetadata {
                token_count,
                ..Default::default()
            },
            status: MessageStatus::Completed,
            error: None,
            created_at: now,
        }
    }

    /// Creates a completed summary message replacing an older prefix.
    pub fn summary(
        session_id: SessionId,
        user_id: UserId,
        content: impl Into<String>,
        provider: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        let content = content.into();
        let token_count = estimate_tokens(&content);
        Self {
            id: MessageId::new(),
            session_id,
            user_id,
            role: MessageRole::Summary,
            content,
            metadata: MessageMetadata {
                provider: Some(provider.into()),
                token_count,
                ..Default::default()
            },
            status: MessageStatus::Completed,
            error: None,
            created_at: now,
        }
    }

    /// Creates the pending assistant message for a turn, `Streaming` with
    /// empty content.
    pub fn streaming_assistant(
        session_id: SessionId,
        user_id: UserId,
        provider: impl Into<String>,
        model: Option<String>,
        correlation_id: CorrelationId,
        now: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            user_id,
            role: MessageRole::Assistant,
            content: String::new(),
            metadata: MessageMetadata {
                provider: Some(provider.into()),
                model,
                correlation_id: Some(correlation_id),
                is_streaming: true,
                ..Default::default()
            },
            status: MessageStatus::Streaming,
            error: None,
            created_at: now,
        }
    }

    /// Reconstitutes a message from persistence.
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: MessageId,
        session_id: SessionId,
        user_id: UserId,
        role: MessageRole,
        content: String,
        metadata: MessageMetadata,
        status: MessageStatus,
        error: Option<MessageError>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            session_id,
            user_id,
            role,
            content,
            metadata,
            status,
            error,
            created_at,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    /// Returns the message id.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Returns the owning session id.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Returns the owning user id.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the role.
    pub fn role(&self) -> MessageRole {
        self.role
    }

    /// Returns the content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the metadata.
    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    /// Returns the status.
    pub fn status(&self) -> MessageStatus {
        self.status
    }

    /// Returns the captured error, if any.
    pub fn error(&self) -> Option<&MessageError> {
        self.error.as_ref()
    }

    /// Returns the server-assigned creation time.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    // ─────────────────────────────────────────────────────────────────────
    // Terminal transitions (Streaming → Completed | Error | Cancelled)
    // ─────────────────────────────────────────────────────────────────────

    fn ensure_streaming(&self) -> Result<(), CoreError> {
        if self.status != MessageStatus::Streaming {
            return Err(CoreError::new(
                ErrorKind::Internal,
                format!(
                    "Message {} is {:?}, not streaming",
                    self.id, self.status
                ),
            ));
        }
        Ok(())
    }

    /// Finalises a streamed completion.
    pub fn complete(
        &mut self,
        content: String,
        usage: Option<TokenUsage>,
        response_time_ms: u64,
    ) -> Result<(), CoreError> {
        self.ensure_streaming()?;
        self.metadata.token_count = usage
            .map(|u| u.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(&content));
        self.metadata.usage = usage;
        self.metadata.response_time_ms = Some(response_time_ms);
        self.metadata.is_streaming = false;
        self.metadata.streaming_complete = true;
        self.content = content;
        self.status = MessageStatus::Completed;
        Ok(())
    }

    /// Finalises a fallback completion: canned content plus the captured
    /// provider error, but a `Completed` status so the turn reads as answered.
    pub fn complete_with_fallback(
        &mut self,
        content: String,
        cause: &CoreError,
        response_time_ms: u64,
    ) -> Result<(), CoreError> {
        self.ensure_streaming()?;
        self.metadata.token_count = estimate_tokens(&content);
        self.metadata.response_time_ms = Some(response_time_ms);
        self.metadata.is_streaming = false;
        self.metadata.streaming_complete = true;
        self.content = content;
        self.error = Some(MessageError::from_core(cause));
        self.status = MessageStatus::Completed;
        Ok(())
    }

    /// Finalises a failed turn.
    pub fn fail(&mut self, cause: &CoreError, response_time_ms: u64) -> Result<(), CoreError> {
        self.ensure_streaming()?;
        self.metadata.response_time_ms = Some(response_time_ms);
        self.metadata.is_streaming = false;
        self.error = Some(MessageError::from_core(cause));
        self.status = MessageStatus::Error;
        Ok(())
    }

    /// Finalises a client-cancelled turn, keeping the partial content.
    pub fn cancel(&mut self, partial_content: String) -> Result<(), CoreError> {
        self.ensure_streaming()?;
        self.metadata.token_count = estimate_tokens(&partial_content);
        self.metadata.is_streaming = false;
        self.content = partial_content;
        self.status = MessageStatus::Cancelled;
        Ok(())
    }
}
