//! Mock AI provider.
//!
//! The contract-test reference for streaming adapters and the registry's
//! last-resort fallback. In its default configuration it always succeeds;
//! tests can queue specific responses, inject errors, and add latency.
//!
//! Streaming is simulated: the canned text is split into
//! whitespace-delimited fragments (separators preserved, so the
//! concatenation equals the final text) with a small inter-chunk delay.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::domain::message::TokenUsage;
use crate::ports::{
    AiProvider, Completion, CompletionRequest, ConnectionStatus, ProviderError, ProviderInfo,
    StreamChunk, TokenStream,
};

/// Delay between simulated stream fragments.
const CHUNK_DELAY: Duration = Duration::from_millis(10);

/// A configured mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return a successful completion.
    Success {
        content: String,
        usage: TokenUsage,
    },
    /// Return an error (for resilience tests; never queued by default).
    Error(MockFailure),
}

/// Mock error shapes for testing error handling.
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// Simulate provider rate limiting.
    RateLimited { retry_after_secs: u32 },
    /// Simulate provider unavailable.
    Unavailable { message: String },
    /// Simulate a network error.
    Network { message: String },
    /// Simulate a timeout.
    Timeout { timeout_secs: u32 },
}

impl From<MockFailure> for ProviderError {
    fn from(err: MockFailure) -> Self {
        match err {
            MockFailure::RateLimited { retry_after_secs } => {
                ProviderError::rate_limited(retry_after_secs)
            }
            MockFailure::Unavailable { message } => ProviderError::unavailable(message),
            MockFailure::Network { message } => ProviderError::network(message),
            MockFailure::Timeout { timeout_secs } => ProviderError::Timeout { timeout_secs },
        }
    }
}

/// Mock provider for testing and as the always-working fallback.
#[derive(Debug, Clone)]
pub struct MockProvider {
    /// Queued responses, consumed in order; empty queue yields the default.
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    /// Provider info to report.
    info: ProviderInfo,
    /// Simulated latency before the first chunk.
    delay: Duration,
    /// Number of calls made, for verification.
    calls: Arc<Mutex<u32>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Creates a mock provider with default settings.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            info: ProviderInfo::new("mock", "mock-model-1", 128_000).with_simulated_streaming(),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Queues a successful response.
    pub fn with_response(self, content: impl Into<String>) -> Self {
        let content = content.into();
        let usage = TokenUsage::new(10, crate::domain::message::estimate_tokens(&content));
        self.responses
            .lock()
            .unwrap()
            .push_back(MockResponse::Success { content, usage });
        self
    }

    /// Queues a successful response with explicit usage.
    pub fn with_response_usage(self, content: impl Into<String>, usage: TokenUsage) -> Self {
        self.responses.lock().unwrap().push_back(MockResponse::Success {
            content: content.into(),
            usage,
        });
        self
    }

    /// Queues an error response.
    pub fn with_error(self, failure: MockFailure) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockResponse::Error(failure));
        self
    }

    /// Sets simulated latency before the first chunk.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the number of calls made to this provider.
    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    /// Pops the next queued response, or the always-succeeding default.
    fn next_response(&self) -> MockResponse {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockResponse::Success {
                content: "This is a mock response standing in for a model completion."
                    .to_string(),
                usage: TokenUsage::new(12, 11),
            })
    }

    fn record_call(&self) {
        *self.calls.lock().unwrap() += 1;
    }

    fn build_completion(&self, content: String, usage: TokenUsage) -> Completion {
        Completion {
            text: content,
            usage,
            id: format!("mock-{}", Uuid::new_v4()),
            model: self.info.model.clone(),
        }
    }
}

/// Splits text into whitespace-delimited fragments whose concatenation
/// equals the input.
fn fragment(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(|s| s.to_string())
        .collect()
}

#[async_trait]
impl AiProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, ProviderError> {
        self.record_call();

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match self.next_response() {
            MockResponse::Success { content, usage } => Ok(self.build_completion(content, usage)),
            MockResponse::Error(failure) => Err(failure.into()),
        }
    }

    async fn stream_completion(
        &self,
        _request: CompletionRequest,
    ) -> Result<TokenStream, ProviderError> {
        self.record_call();

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match self.next_response() {
            MockResponse::Success { content, usage } => {
                let completion = self.build_completion(content.clone(), usage);

                let deltas = fragment(&content)
                    .into_iter()
                    .filter(|f| !f.is_empty())
                    .collect::<Vec<_>>();

                let chunked = stream::iter(deltas).then(|delta| async move {
                    sleep(CHUNK_DELAY).await;
                    Ok::<_, ProviderError>(StreamChunk::Delta(delta))
                });

                let terminal =
                    stream::once(async move { Ok::<_, ProviderError>(StreamChunk::Done(completion)) });

                Ok(Box::pin(chunked.chain(terminal)) as TokenStream)
            }
            MockResponse::Error(failure) => Err(failure.into()),
        }
    }

    async fn test_connection(&self) -> ConnectionStatus {
        ConnectionStatus::ok("mock")
    }

    fn info(&self) -> ProviderInfo {
        self.info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{CorrelationId, SessionId, UserId};
    use crate::ports::{PromptRole, RequestMetadata};
    use futures::StreamExt;

    fn test_request() -> CompletionRequest {
        CompletionRequest::new(RequestMetadata::new(
            UserId::new("test-user").unwrap(),
            SessionId::new(),
            CorrelationId::new(),
        ))
        .with_message(PromptRole::User, "Hello")
    }

    #[tokio::test]
    async fn returns_configured_response() {
        let provider = MockProvider::new().with_response("Hello from mock!");

        let completion = provider.complete(test_request()).await.unwrap();

        assert_eq!(completion.text, "Hello from mock!");
        assert_eq!(completion.model, "mock-model-1");
        assert!(completion.id.starts_with("mock-"));
    }

    #[tokio::test]
    async fn returns_responses_in_order_then_default() {
        let provider = MockProvider::new().with_response("First").with_response("Second");

        assert_eq!(provider.complete(test_request()).await.unwrap().text, "First");
        assert_eq!(provider.complete(test_request()).await.unwrap().text, "Second");
        // Queue exhausted: the default always succeeds.
        assert!(!provider.complete(test_request()).await.unwrap().text.is_empty());
    }

    #[tokio::test]
    async fn default_configuration_always_succeeds() {
        let provider = MockProvider::new();
        for _ in 0..3 {
            assert!(provider.complete(test_request()).await.is_ok());
        }
    }

    #[tokio::test]
    async fn stream_concatenation_equals_final_text() {
        let provider = MockProvider::new().with_response("Hello streaming world, once more");

        let mut stream = provider.stream_completion(test_request()).await.unwrap();

        let mut assembled = String::new();
        let mut terminal = None;
        while let Some(chunk) = stream.next().await {
            match chunk.unwrap() {
                StreamChunk::Delta(delta) => {
                    assert!(!delta.is_empty());
                    assembled.push_str(&delta);
                }
                StreamChunk::Done(completion) => terminal = Some(completion),
            }
        }

        let completion = terminal.expect("terminal chunk");
        assert_eq!(assembled, completion.text);
        assert_eq!(completion.text, "Hello streaming world, once more");
    }

    #[tokio::test]
    async fn terminal_chunk_arrives_exactly_once_and_last() {
        let provider = MockProvider::new().with_response("a b c");
        let mut stream = provider.stream_completion(test_request()).await.unwrap();

        let mut saw_terminal = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert!(!saw_terminal, "chunk after terminal frame");
            if chunk.is_final() {
                saw_terminal = true;
            }
        }
        assert!(saw_terminal);
    }

    #[tokio::test]
    async fn configured_error_propagates() {
        let provider = MockProvider::new().with_error(MockFailure::Unavailable {
            message: "down for maintenance".to_string(),
        });

        let err = match provider.stream_completion(test_request()).await {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, ProviderError::Unavailable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn tracks_call_count() {
        let provider = MockProvider::new();
        assert_eq!(provider.call_count(), 0);
        provider.complete(test_request()).await.unwrap();
        provider.stream_completion(test_request()).await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn connection_probe_always_succeeds() {
        let status = MockProvider::new().test_connection().await;
        assert!(status.success);
        assert_eq!(status.name, "mock");
    }

    #[test]
    fn fragment_preserves_text() {
        for text in ["a b  c", " leading", "trailing ", "one", ""] {
            assert_eq!(fragment(text).concat(), text);
        }
    }
}
