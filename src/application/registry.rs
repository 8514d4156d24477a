//! Provider registry - holds adapters and selects a working one.
//!
//! The orchestrator resolves the session's provider directly (no probe) and
//! only falls back on stream-time failure. `get_working` probes with
//! `test_connection` and is reserved for fallback selection and health
//! reporting; the mock adapter is the guaranteed last resort.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ports::{AiProvider, ConnectionStatus};

/// Name under which the last-resort adapter is registered.
pub const MOCK_PROVIDER: &str = "mock";

/// Registry of provider adapters.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AiProvider>>,
    default_provider: String,
}

impl ProviderRegistry {
    /// Creates a registry with the given process default. The mock adapter
    /// is always present.
    pub fn new(default_provider: impl Into<String>) -> Self {
        let mut providers: HashMap<String, Arc<dyn AiProvider>> = HashMap::new();
        providers.insert(
            MOCK_PROVIDER.to_string(),
            Arc::new(crate::adapters::ai::MockProvider::new()),
        );

        Self {
            providers,
            default_provider: default_provider.into(),
        }
    }

    /// Registers an adapter under its own name.
    pub fn register(&mut self, provider: Arc<dyn AiProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Registers an adapter and returns the registry (builder form).
    pub fn with(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Looks up an adapter by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn AiProvider>> {
        self.providers.get(name).cloned()
    }

    /// Returns the process default provider name.
    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Returns the registered provider names.
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Selects a working adapter: `preferred`, then the process default,
    /// then mock, probing each with `test_connection`.
    ///
    /// The mock adapter always probes successfully, so this cannot fail.
    pub async fn get_working(&self, preferred: Option<&str>) -> Arc<dyn AiProvider> {
        let mut order: Vec<&str> = Vec::new();
        if let Some(preferred) = preferred {
            order.push(preferred);
        }
        order.push(&self.default_provider);
        order.push(MOCK_PROVIDER);

        for name in order {
            if let Some(provider) = self.providers.get(name) {
                let status = provider.test_connection().await;
                if status.success {
                    return provider.clone();
                }
                tracing::warn!(
                    provider = name,
                    error = status.error.as_deref().unwrap_or("unknown"),
                    "provider probe failed, trying next"
                );
            }
        }

        // Unreachable in practice; the mock is always registered and healthy.
        self.providers
            .get(MOCK_PROVIDER)
            .cloned()
            .expect("mock provider is always registered")
    }

    /// Probes every registered adapter.
    pub async fn probe_all(&self) -> Vec<ConnectionStatus> {
        let mut statuses = Vec::new();
        for provider in self.providers.values() {
            statuses.push(provider.test_connection().await);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::MockProvider;
    use crate::ports::{
        AiProvider, Completion, CompletionRequest, ProviderError, ProviderInfo, TokenStream,
    };
    use async_trait::async_trait;

    /// Adapter whose probe always fails.
    struct DownProvider;

    #[async_trait]
    impl AiProvider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _: CompletionRequest) -> Result<Completion, ProviderError> {
            Err(ProviderError::unavailable("down"))
        }

        async fn stream_completion(
            &self,
            _: CompletionRequest,
        ) -> Result<TokenStream, ProviderError> {
            Err(ProviderError::unavailable("down"))
        }

        async fn test_connection(&self) -> ConnectionStatus {
            ConnectionStatus::failed("down", "always down")
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo::new("down", "down-1", 1)
        }
    }

    #[test]
    fn mock_is_always_registered() {
        let registry = ProviderRegistry::new("mock");
        assert!(registry.get(MOCK_PROVIDER).is_some());
    }

    #[tokio::test]
    async fn get_working_prefers_the_preferred_provider() {
        let registry = ProviderRegistry::new("mock").with(Arc::new(MockProvider::new()));
        let provider = registry.get_working(Some("mock")).await;
        assert_eq!(provider.name(), "mock");
    }

    #[tokio::test]
    async fn get_working_skips_failing_providers() {
        let registry = ProviderRegistry::new("down").with(Arc::new(DownProvider));

        // Preferred and default are both down; the mock wins.
        let provider = registry.get_working(Some("down")).await;
        assert_eq!(provider.name(), "mock");
    }

    #[tokio::test]
    async fn get_working_handles_unknown_preferred() {
        let registry = ProviderRegistry::new("mock");
        let provider = registry.get_working(Some("no-such-provider")).await;
        assert_eq!(provider.name(), "mock");
    }

    #[tokio::test]
    async fn probe_all_reports_each_provider() {
        let registry = ProviderRegistry::new("mock").with(Arc::new(DownProvider));
        let statuses = registry.probe_all().await;

        assert_eq!(statuses.len(), 2);
        assert!(!statuses[0].success); // "down"
        assert!(statuses[1].success); // "mock"
    }
}
