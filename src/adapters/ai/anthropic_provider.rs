//! Anthropic provider - implementation of [`AiProvider`] for the Claude API.
//!
//! Streaming uses Anthropic's SSE event format (`message_start`,
//! `content_block_delta`, `message_delta`, `message_stop`). Events can be
//! split across transport chunks, so parsing runs over a line buffer rather
//! than per-chunk.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use crate::domain::message::TokenUsage;
use crate::ports::{
    AiProvider, Completion, CompletionRequest, ConnectionStatus, PromptRole, ProviderError,
    ProviderInfo, StreamChunk, TokenStream,
};

/// Anthropic API version header value.
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// Configuration for the Anthropic provider.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key for authentication.
    api_key: Secret<String>,
    /// Model to use.
    pub model: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum retries on transient failures (non-streaming path).
    pub max_retries: u32,
}

impl AnthropicConfig {
    /// Creates a new configuration with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Anthropic API provider implementation.
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicProvider {
    /// Creates a new Anthropic provider with the given configuration.
    pub fn new(config: AnthropicConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url)
    }

    /// Converts our request to Anthropic's format. System-role messages
    /// (including folded-in conversation summaries) travel in the top-level
    /// `system` field, which Anthropic requires.
    fn to_api_request(&self, request: &CompletionRequest, stream: bool) -> ApiRequest {
        let mut messages = Vec::new();
        let mut system_parts: Vec<String> = request.system_prompt.clone().into_iter().collect();

        for msg in &request.messages {
            let role = match msg.role {
                PromptRole::System => {
                    system_parts.push(msg.content.clone());
                    continue;
                }
                PromptRole::User => "user",
                PromptRole::Assistant => "assistant",
            };
            messages.push(ApiMessage {
                role: role.to_string(),
                content: msg.content.clone(),
            });
        }

        ApiRequest {
            model: request
                .options
                .model
                .clone()
                .unwrap_or_else(|| self.config.model.clone()),
            messages,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            max_tokens: request.options.max_tokens.unwrap_or(1024),
            temperature: request.options.temperature,
            stream: stream.then_some(true),
        }
    }

    async fn send_request(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<Response, ProviderError> {
        let api_request = self.to_api_request(request, stream);

        self.client
            .post(self.messages_url())
            .header("x-api-key", self.config.api_key())
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .header("Content-Type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        timeout_secs: self.config.timeout.as_secs() as u32,
                    }
                } else if e.is_connect() {
                    ProviderError::network(format!("Connection failed: {}", e))
                } else {
                    ProviderError::network(e.to_string())
                }
            })
    }

    /// Maps non-success statuses to provider errors.
    async fn handle_response_status(&self, response: Response) -> Result<Response, ProviderError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let error_body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => Err(ProviderError::AuthenticationFailed),
            429 => Err(ProviderError::rate_limited(parse_retry_after(&error_body))),
            400 => {
                if error_body.contains("prompt is too long") {
                    Err(ProviderError::ContextTooLong { tokens: 0, max: 0 })
                } else {
                    Err(ProviderError::InvalidRequest(error_body))
                }
            }
            500..=599 => Err(ProviderError::unavailable(format!(
                "Server error {}: {}",
                status, error_body
            ))),
            _ => Err(ProviderError::network(format!(
                "Unexpected status {}: {}",
                status, error_body
            ))),
        }
    }

    async fn parse_response(&self, response: Response) -> Result<Completion, ProviderError> {
        let response = self.handle_response_status(response).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::parse(format!("Failed to parse response: {}", e)))?;

        let text = api_response
            .content
            .into_iter()
            .filter_map(|block| (block.block_type == "text").then_some(block.text).flatten())
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            text,
            usage: TokenUsage::new(
                api_response.usage.input_tokens,
                api_response.usage.output_tokens,
            ),
            id: api_response.id,
            model: api_response.model,
        })
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let mut last_error = ProviderError::network("No attempts made");
        let mut retry_count = 0;

        while retry_count <= self.config.max_retries {
            match self.send_request(&request, false).await {
                Ok(response) => match self.parse_response(response).await {
                    Ok(completion) => return Ok(completion),
                    Err(err) => {
                        if !err.is_retryable() || retry_count >= self.config.max_retries {
                            return Err(err);
                        }
                        last_error = err;
                    }
                },
                Err(err) => {
                    if !err.is_retryable() || retry_count >= self.config.max_retries {
                        return Err(err);
                    }
                    last_error = err;
                }
            }

            // Exponential backoff: 1s, 2s, 4s, ...
            sleep(Duration::from_secs(1 << retry_count)).await;
            retry_count += 1;
        }

        Err(last_error)
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<TokenStream, ProviderError> {
        let response = self.send_request(&request, true).await?;
        let response = self.handle_response_status(response).await?;

        let model = self.config.model.clone();
        let mut bytes_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut parser = SseLineParser::default();
            let mut assembled = String::new();
            let mut response_id = String::new();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;
            let mut terminated = false;

            while let Some(chunk) = bytes_stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(ProviderError::network(format!("Stream error: {}", e)));
                        return;
                    }
                };

                for event in parser.feed(&bytes) {
                    match event {
                        SseEvent::MessageStart { id, input } => {
                            response_id = id;
                            input_tokens = input;
                        }
                        SseEvent::Delta(text) => {
                            if !text.is_empty() {
                                assembled.push_str(&text);
                                yield Ok(StreamChunk::Delta(text));
                            }
                        }
                        SseEvent::MessageDelta { output } => {
                            output_tokens = output;
                        }
                        SseEvent::MessageStop => {
                            terminated = true;
                            yield Ok(StreamChunk::Done(Completion {
                                text: assembled.clone(),
                                usage: TokenUsage::new(input_tokens, output_tokens),
                                id: response_id.clone(),
                                model: model.clone(),
                            }));
                            return;
                        }
                        SseEvent::Error(message) => {
                            yield Err(ProviderError::unavailable(message));
                            return;
                        }
                    }
                }
            }

            if !terminated {
                yield Err(ProviderError::network(
                    "Stream ended before message_stop".to_string(),
                ));
            }
        };

        Ok(Box::pin(stream) as TokenStream)
    }

    async fn test_connection(&self) -> ConnectionStatus {
        // A HEAD-equivalent cheap probe: list-models style endpoints are not
        // public, so probe the base URL with a short timeout.
        let result = self
            .client
            .get(&self.config.base_url)
            .timeout(Duration::from_secs(1))
            .send()
            .await;

        match result {
            Ok(_) => ConnectionStatus::ok("anthropic"),
            Err(e) => ConnectionStatus::failed("anthropic", e.to_string()),
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo::new("anthropic", &self.config.model, 200_000)
    }
}

/// Parses retry-after hints out of error response bodies.
fn parse_retry_after(error_body: &str) -> u32 {
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(error_body) {
        if let Some(s) = parsed
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            if let Some(idx) = s.find("try again in ") {
                let rest = &s[idx + 13..];
                if let Some(num_end) = rest.find(|c: char| !c.is_ascii_digit()) {
                    if let Ok(secs) = rest[..num_end].parse::<u32>() {
                        return secs;
                    }
                }
            }
        }
    }
    60
}

// ─── SSE parsing ─────────────────────────────────────────────────────────────

/// Parsed Anthropic stream event.
#[derive(Debug)]
enum SseEvent {
    MessageStart { id: String, input: u32 },
    Delta(String),
    MessageDelta { output: u32 },
    MessageStop,
    Error(String),
}

/// Incremental SSE line parser. Transport chunks may split lines and events
/// arbitrarily; the parser buffers partial lines between `feed` calls.
#[derive(Default)]
struct SseLineParser {
    buffer: String,
    current_event: String,
}

impl SseLineParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end();

            if let Some(event_type) = line.strip_prefix("event: ") {
                self.current_event = event_type.to_string();
            } else if let Some(data) = line.strip_prefix("data: ") {
                if let Some(event) = self.parse_data(data) {
                    events.push(event);
                }
            }
        }
        events
    }

    fn parse_data(&self, data: &str) -> Option<SseEvent> {
        match self.current_event.as_str() {
            "message_start" => {
                let parsed: MessageStartData = serde_json::from_str(data).ok()?;
                Some(SseEvent::MessageStart {
                    id: parsed.message.id,
                    input: parsed.message.usage.input_tokens,
                })
            }
            "content_block_delta" => {
                let parsed: ContentBlockDelta = serde_json::from_str(data).ok()?;
                parsed.delta.text.map(SseEvent::Delta)
            }
            "message_delta" => {
                let parsed: MessageDeltaData = serde_json::from_str(data).ok()?;
                Some(SseEvent::MessageDelta {
                    output: parsed.usage.map(|u| u.output_tokens).unwrap_or(0),
                })
            }
            "message_stop" => Some(SseEvent::MessageStop),
            "error" => {
                let parsed: StreamErrorData = serde_json::from_str(data).ok()?;
                Some(SseEvent::Error(
                    parsed
                        .error
                        .message
                        .unwrap_or_else(|| "Stream error".to_string()),
                ))
            }
            // message_start bookkeeping handled above; ping and block
            // start/stop markers carry nothing we need.
            _ => None,
        }
    }
}

// ─── Anthropic API types ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    id: String,
    model: String,
    content: Vec<ContentBlock>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessageStartData {
    message: MessageStartMessage,
}

#[derive(Debug, Deserialize)]
struct MessageStartMessage {
    id: String,
    usage: ApiUsage2,
}

#[derive(Debug, Deserialize)]
struct ApiUsage2 {
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: DeltaBody,
}

#[derive(Debug, Deserialize)]
struct DeltaBody {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaData {
    usage: Option<DeltaUsage>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamErrorData {
    error: StreamErrorBody,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_handles_events_split_across_chunks() {
        let mut parser = SseLineParser::default();

        let part1 = b"event: content_block_delta\ndata: {\"delta\":{\"te";
        let part2 = b"xt\":\"Hello\"}}\n\n";

        assert!(parser.feed(part1).is_empty());
        let events = parser.feed(part2);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SseEvent::Delta(t) if t == "Hello"));
    }

    #[test]
    fn parser_extracts_message_lifecycle() {
        let mut parser = SseLineParser::default();
        let input = concat!(
            "event: message_start\n",
            "data: {\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":12}}}\n",
            "event: content_block_delta\n",
            "data: {\"delta\":{\"text\":\"Hi\"}}\n",
            "event: message_delta\n",
            "data: {\"usage\":{\"output_tokens\":7}}\n",
            "event: message_stop\n",
            "data: {}\n",
        );

        let events = parser.feed(input.as_bytes());
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[0],
            SseEvent::MessageStart { id, input } if id == "msg_1" && *input == 12
        ));
        assert!(matches!(&events[1], SseEvent::Delta(t) if t == "Hi"));
        assert!(matches!(&events[2], SseEvent::MessageDelta { output: 7 }));
        assert!(matches!(&events[3], SseEvent::MessageStop));
    }

    #[test]
    fn parser_surfaces_error_events() {
        let mut parser = SseLineParser::default();
        let input = "event: error\ndata: {\"error\":{\"message\":\"overloaded\"}}\n";

        let events = parser.feed(input.as_bytes());
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SseEvent::Error(m) if m == "overloaded"));
    }

    #[test]
    fn retry_after_parses_hint_or_defaults() {
        let body = r#"{"error":{"message":"rate limited, try again in 17s"}}"#;
        assert_eq!(parse_retry_after(body), 17);
        assert_eq!(parse_retry_after("not json"), 60);
    }

    #[test]
    fn request_maps_system_to_top_level_field() {
        let provider = AnthropicProvider::new(AnthropicConfig::new("key"));
        let request = CompletionRequest::new(crate::ports::RequestMetadata::new(
            crate::domain::foundation::UserId::new("u").unwrap(),
            crate::domain::foundation::SessionId::new(),
            crate::domain::foundation::CorrelationId::new(),
        ))
        .with_message(PromptRole::System, "be brief")
        .with_message(PromptRole::User, "hello")
        .with_system_prompt("be kind");

        let api = provider.to_api_request(&request, true);
        assert_eq!(api.messages.len(), 1);
        assert_eq!(api.messages[0].role, "user");
        // The system prompt and system-role messages merge into the
        // top-level field.
        assert_eq!(api.system.as_deref(), Some("be kind\n\nbe brief"));
        assert_eq!(api.stream, Some(true));
    }

    #[test]
    fn config_debug_does_not_leak_api_key() {
        let config = AnthropicConfig::new("sk-secret-value");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret-value"));
    }
}
