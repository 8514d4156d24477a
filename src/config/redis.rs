//! Redis configuration (shared rate-limit counters).

use serde::Deserialize;

/// Redis connection configuration. Optional: without a URL the rate limiter
/// runs purely in-process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    /// Connection URL (redis://…); absent disables the shared store.
    pub url: Option<String>,
}

impl RedisConfig {
    /// Returns true when a shared store is configured.
    pub fn is_configured(&self) -> bool {
        self.url.as_ref().is_some_and(|u| !u.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_url_counts_as_unconfigured() {
        assert!(!RedisConfig::default().is_configured());
        assert!(!RedisConfig {
            url: Some(String::new())
        }
        .is_configured());
        assert!(RedisConfig {
            url: Some("redis://127.0.0.1/".to_string())
        }
        .is_configured());
    }
}
