//! AI provider port - the uniform streaming contract every adapter honours.
//!
//! # Streaming guarantees
//!
//! - Delta chunks carry non-empty text fragments; their concatenation equals
//!   the terminal completion's `text`.
//! - Exactly one terminal chunk (or stream error) is yielded, after the last
//!   delta.
//! - Adapters without native streaming simulate it by chunking the final text
//!   into whitespace-delimited fragments with a small inter-chunk delay.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::domain::foundation::{CorrelationId, SessionId, UserId};
use crate::domain::message::TokenUsage;

/// Stream of completion chunks owned by the adapter.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Port for AI/LLM provider interactions.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable provider name used for registry lookup and session settings.
    fn name(&self) -> &str;

    /// Generate a single completion (non-streaming).
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    /// Generate a streaming completion.
    ///
    /// The final chunk carries the assembled completion with token usage.
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<TokenStream, ProviderError>;

    /// Cheap reachability probe, used only by fallback selection - never on
    /// the per-turn critical path. Must return within one second.
    async fn test_connection(&self) -> ConnectionStatus;

    /// Provider information (name, model, capabilities).
    fn info(&self) -> ProviderInfo;
}

/// Request for a completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Conversation messages (history + current user message).
    pub messages: Vec<PromptMessage>,
    /// System prompt to guide model behavior.
    pub system_prompt: Option<String>,
    /// Sampling options.
    pub options: CompletionOptions,
    /// Request metadata for tracing.
    pub metadata: RequestMetadata,
}

impl CompletionRequest {
    /// Creates a new completion request with required metadata.
    pub fn new(metadata: RequestMetadata) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt: None,
            options: CompletionOptions::default(),
            metadata,
        }
    }

    /// Adds a message to the conversation.
    pub fn with_message(mut self, role: PromptRole, content: impl Into<String>) -> Self {
        self.messages.push(PromptMessage {
            role,
            content: content.into(),
        });
        self
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the sampling options.
    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }
}

/// A message in the prompt sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Who sent this message.
    pub role: PromptRole,
    /// Message content.
    pub content: String,
}

impl PromptMessage {
    /// Creates a new prompt message.
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(PromptRole::User, content)
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(PromptRole::Assistant, content)
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(PromptRole::System, content)
    }
}

/// Role of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Model output.
    Assistant,
}

/// Sampling options for a completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    /// Model override; adapters fall back to their configured default.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum completion tokens.
    pub max_tokens: Option<u32>,
}

/// Request metadata for tracing.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// User making the request.
    pub user_id: UserId,
    /// Session containing this conversation.
    pub session_id: SessionId,
    /// Correlation id for distributed tracing.
    pub correlation_id: CorrelationId,
}

impl RequestMetadata {
    /// Creates new request metadata.
    pub fn new(user_id: UserId, session_id: SessionId, correlation_id: CorrelationId) -> Self {
        Self {
            user_id,
            session_id,
            correlation_id,
        }
    }
}

/// Final result of a completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Token usage for billing and context accounting.
    pub usage: TokenUsage,
    /// Provider-assigned response id.
    pub id: String,
    /// Model that generated the response.
    pub model: String,
}

/// One item of a [`TokenStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A non-empty text fragment.
    Delta(String),
    /// The terminal frame; no further chunks follow.
    Done(Completion),
}

impl StreamChunk {
    /// Returns true for the terminal frame.
    pub fn is_final(&self) -> bool {
        matches!(self, StreamChunk::Done(_))
    }
}

/// Result of a connection probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    /// True when the provider answered the probe.
    pub success: bool,
    /// Provider name.
    pub name: String,
    /// Probe failure details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    /// Creates a successful status.
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            success: true,
            name: name.into(),
            error: None,
        }
    }

    /// Creates a failed status.
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            name: name.into(),
            error: Some(error.into()),
        }
    }
}

/// Provider information and capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider name (e.g. "openai", "anthropic", "mock").
    pub name: String,
    /// Default model identifier.
    pub model: String,
    /// Maximum context window size in tokens.
    pub max_context_tokens: u32,
    /// Whether streaming is native (false means simulated chunking).
    pub native_streaming: bool,
}

impl ProviderInfo {
    /// Creates new provider info.
    pub fn new(name: impl Into<String>, model: impl Into<String>, max_context_tokens: u32) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            max_context_tokens,
            native_streaming: true,
        }
    }

    /// Marks streaming as simulated.
    pub fn with_simulated_streaming(mut self) -> Self {
        self.native_streaming = false;
        self
    }
}

/// AI provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Rate limited by the provider.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until retry is allowed.
        retry_after_secs: u32,
    },

    /// Context (prompt + history) exceeds the model limit.
    #[error("context too long: {tokens} tokens exceeds {max} limit")]
    ContextTooLong {
        /// Actual token count.
        tokens: u32,
        /// Maximum allowed.
        max: u32,
    },

    /// Provider is unavailable.
    #[error("provider unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// API key or authentication failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Network error during the request.
    #[error("network error: {0}")]
    Network(String),

    /// Failed to parse the provider response.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid request configuration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request timed out.
    #[error("request timed out after {timeout_secs}s")]
    Timeout {
        /// Configured timeout.
        timeout_secs: u32,
    },
}

impl ProviderError {
    /// Creates a rate limited error.
    pub fn rate_limited(retry_after_secs: u32) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Returns true if this error is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Unavailable { .. }
                | ProviderError::Network(_)
                | ProviderError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_metadata() -> RequestMetadata {
        RequestMetadata::new(
            UserId::new("test-user").unwrap(),
            SessionId::new(),
            CorrelationId::new(),
        )
    }

    #[test]
    fn completion_request_builder_works() {
        let request = CompletionRequest::new(test_metadata())
            .with_message(PromptRole::User, "Hello")
            .with_system_prompt("Be helpful")
            .with_options(CompletionOptions {
                model: Some("small-1".to_string()),
                temperature: Some(0.7),
                max_tokens: Some(100),
            });

        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, PromptRole::User);
        assert_eq!(request.system_prompt.as_deref(), Some("Be helpful"));
        assert_eq!(request.options.max_tokens, Some(100));
    }

    #[test]
    fn prompt_message_constructors_work() {
        assert_eq!(PromptMessage::system("s").role, PromptRole::System);
        assert_eq!(PromptMessage::user("u").role, PromptRole::User);
        assert_eq!(PromptMessage::assistant("a").role, PromptRole::Assistant);
    }

    #[test]
    fn stream_chunk_final_detection() {
        assert!(!StreamChunk::Delta("hi".to_string()).is_final());
        assert!(StreamChunk::Done(Completion {
            text: "hi".to_string(),
            usage: TokenUsage::zero(),
            id: "r1".to_string(),
            model: "m".to_string(),
        })
        .is_final());
    }

    #[test]
    fn provider_error_retryable_classification() {
        assert!(ProviderError::rate_limited(30).is_retryable());
        assert!(ProviderError::unavailable("down").is_retryable());
        assert!(ProviderError::network("reset").is_retryable());
        assert!(ProviderError::Timeout { timeout_secs: 30 }.is_retryable());

        assert!(!ProviderError::AuthenticationFailed.is_retryable());
        assert!(!ProviderError::parse("bad json").is_retryable());
        assert!(!ProviderError::InvalidRequest("nope".to_string()).is_retryable());
    }

    #[test]
    fn prompt_role_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PromptRole::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn connection_status_constructors() {
        let ok = ConnectionStatus::ok("mock");
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = ConnectionStatus::failed("openai", "401");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("401"));
    }
}
