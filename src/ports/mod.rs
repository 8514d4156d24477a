//! Ports: async trait seams between the core and its collaborators.

mod ai_provider;
mod metrics;
mod rate_limiter;
mod stores;
mod token_validator;

pub use ai_provider::{
    AiProvider, Completion, CompletionOptions, CompletionRequest, ConnectionStatus, PromptMessage,
    PromptRole, ProviderError, ProviderInfo, RequestMetadata, StreamChunk, TokenStream,
};
pub use metrics::{counters, InMemoryMetrics, MetricsSink, NoOpMetrics};
pub use rate_limiter::{RateDecision, RateKey, RateLimiter};
pub use stores::{MessageStore, SessionStore, UserStore};
pub use token_validator::{TokenValidator, ValidatedToken};
