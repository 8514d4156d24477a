//! Provider adapters implementing the [`crate::ports::AiProvider`] contract.

mod anthropic_provider;
mod mock_provider;
mod openai_provider;

pub use anthropic_provider::{AnthropicConfig, AnthropicProvider};
pub use mock_provider::{MockFailure, MockProvider, MockResponse};
pub use openai_provider::{OpenAiConfig, OpenAiProvider};
