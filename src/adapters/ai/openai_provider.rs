//! OpenAI provider - implementation of [`AiProvider`] for the Chat
//! Completions API.
//!
//! Streaming uses OpenAI's SSE format: `data: {json}` lines terminated by
//! `data: [DONE]`. Usage arrives in a final data chunk when
//! `stream_options.include_usage` is set.

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

/// Configuration for the OpenAI provider.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
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

impl OpenAiConfig {
    /// Creates a new configuration with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com".to_string(),
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

/// OpenAI API provider implementation.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Creates a new OpenAI provider with the given configuration.
    pub fn new(config: OpenAiConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url)
    }

    /// Converts our request to OpenAI's format. The system prompt becomes the
    /// leading `system` message.
    fn to_api_request(&self, request: &CompletionRequest, stream: bool) -> ApiRequest {
        let mut messages = Vec::new();

        if let Some(system) = &request.system_prompt {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }

        for msg in &request.messages {
            let role = match msg.role {
                PromptRole::System => "system",
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
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
            stream: stream.then_some(true),
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn send_request(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<Response, ProviderError> {
        let api_request = self.to_api_request(request, stream);

        self.client
            .post(self.completions_url())
            .bearer_auth(self.config.api_key())
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

    async fn handle_response_status(&self, response: Response) -> Result<Response, ProviderError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(30);
        let error_body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => Err(ProviderError::AuthenticationFailed),
            429 => Err(ProviderError::rate_limited(retry_after)),
            400 => {
                if error_body.contains("maximum context length") {
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
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.map(|m| m.content))
            .unwrap_or_default();

        let usage = api_response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            text,
            usage,
            id: api_response.id,
            model: api_response.model,
        })
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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

        let fallback_model = self.config.model.clone();
        let mut bytes_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            let mut assembled = String::new();
            let mut response_id = String::new();
            let mut model = fallback_model;
            let mut usage = TokenUsage::zero();
            let mut done = false;

            while let Some(chunk) = bytes_stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(ProviderError::network(format!("Stream error: {}", e)));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    let line = line.trim_end();

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    if data == "[DONE]" {
                        done = true;
                        yield Ok(StreamChunk::Done(Completion {
                            text: assembled.clone(),
                            usage,
                            id: response_id.clone(),
                            model: model.clone(),
                        }));
                        return;
                    }

                    let Ok(parsed) = serde_json::from_str::<StreamData>(data) else {
                        continue;
                    };

                    if !parsed.id.is_empty() {
                        response_id = parsed.id;
                    }
                    if !parsed.model.is_empty() {
                        model = parsed.model;
                    }
                    if let Some(u) = parsed.usage {
                        usage = TokenUsage::new(u.prompt_tokens, u.completion_tokens);
                    }
                    if let Some(delta) = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta)
                        .and_then(|d| d.content)
                    {
                        if !delta.is_empty() {
                            assembled.push_str(&delta);
                            yield Ok(StreamChunk::Delta(delta));
                        }
                    }
                }
            }

            if !done {
                yield Err(ProviderError::network(
                    "Stream ended before [DONE]".to_string(),
                ));
            }
        };

        Ok(Box::pin(stream) as TokenStream)
    }

    async fn test_connection(&self) -> ConnectionStatus {
        let result = self
            .client
            .get(format!("{}/v1/models", self.config.base_url))
            .bearer_auth(self.config.api_key())
            .timeout(Duration::from_secs(1))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => ConnectionStatus::ok("openai"),
            Ok(response) => {
                ConnectionStatus::failed("openai", format!("status {}", response.status()))
            }
            Err(e) => ConnectionStatus::failed("openai", e.to_string()),
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo::new("openai", &self.config.model, 128_000)
    }
}

// ─── OpenAI API types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
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
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: Option<ApiMessage2>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage2 {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamData {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
