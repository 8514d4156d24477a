//! AI provider configuration.

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// AI provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    /// OpenAI API key.
    pub openai_api_key: Option<String>,

    /// Anthropic API key.
    pub anthropic_api_key: Option<String>,

    /// Default provider assigned to new sessions.
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Provider used for summarisation; defaults to the default provider.
    pub summariser_provider: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on transient failure (non-streaming path).
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

impl AiConfig {
    /// Returns the timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns true if OpenAI is configured.
    pub fn has_openai(&self) -> bool {
        self.openai_api_key.as_ref().is_some_and(|k| !k.is_empty())
    }

    /// Returns true if Anthropic is configured.
    pub fn has_anthropic(&self) -> bool {
        self.anthropic_api_key
            .as_ref()
            .is_some_and(|k| !k.is_empty())
    }

    /// Returns the summariser provider name.
    pub fn summariser(&self) -> &str {
        self.summariser_provider
            .as_deref()
            .unwrap_or(&self.default_provider)
    }

    /// Validates the section.
    ///
    /// The mock adapter is always available, so a configuration without any
    /// API key is valid as long as the default provider is `mock`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.default_provider.as_str() {
            "openai" if !self.has_openai() => {
                Err(ValidationError::MissingRequired("AI__OPENAI_API_KEY"))
            }
            "anthropic" if !self.has_anthropic() => {
                Err(ValidationError::MissingRequired("AI__ANTHROPIC_API_KEY"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            default_provider: default_provider(),
            summariser_provider: None,
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_retries() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_without_keys() {
        let config = AiConfig::default();
        assert_eq!(config.default_provider, "mock");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn real_default_provider_requires_its_key() {
        let config = AiConfig {
            default_provider: "anthropic".to_string(),
            ..AiConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AiConfig {
            default_provider: "anthropic".to_string(),
            anthropic_api_key: Some("sk-ant-test".to_string()),
            ..AiConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn summariser_falls_back_to_default_provider() {
        let config = AiConfig::default();
        assert_eq!(config.summariser(), "mock");

        let config = AiConfig {
            summariser_provider: Some("openai".to_string()),
            ..AiConfig::default()
        };
        assert_eq!(config.summariser(), "openai");
    }
}
