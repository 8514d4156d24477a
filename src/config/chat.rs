//! Chat core tuning knobs.

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Chat orchestration configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Inactivity expiry of sessions, in days.
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: u32,

    /// Advisory prompt ceiling; informs adapters, not a hard cut.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u64,

    /// Token total above which summarisation triggers.
    #[serde(default = "default_summarisation_threshold")]
    pub summarisation_threshold: u64,

    /// Messages newer than this many minutes are never summarised.
    #[serde(default = "default_recent_window_minutes")]
    pub summarisation_recent_window_minutes: i64,

    /// Global per-IP rate limit window, in milliseconds.
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,

    /// Global per-IP requests per window.
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,

    /// Per-user chat turns per 15-minute window.
    #[serde(default = "default_chat_rate_limit")]
    pub chat_rate_limit_max_requests: u32,

    /// Inbound screen block threshold.
    #[serde(default = "default_safety_threshold")]
    pub safety_inbound_confidence_threshold: f64,

    /// Hard per-turn wall clock, in seconds.
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

impl ChatConfig {
    /// Returns the global IP rate-limit window.
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// Returns the per-turn wall clock.
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    /// Validates the section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.summarisation_threshold == 0 {
            return Err(ValidationError::InvalidChatSetting("summarisation_threshold"));
        }
        if !(0.0..=1.0).contains(&self.safety_inbound_confidence_threshold) {
            return Err(ValidationError::InvalidChatSetting(
                "safety_inbound_confidence_threshold",
            ));
        }
        if self.turn_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("turn_timeout_secs"));
        }
        Ok(())
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            session_ttl_days: default_session_ttl_days(),
            max_context_tokens: default_max_context_tokens(),
            summarisation_threshold: default_summarisation_threshold(),
            summarisation_recent_window_minutes: default_recent_window_minutes(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            chat_rate_limit_max_requests: default_chat_rate_limit(),
            safety_inbound_confidence_threshold: default_safety_threshold(),
            turn_timeout_secs: default_turn_timeout_secs(),
        }
    }
}

fn default_session_ttl_days() -> u32 {
    30
}

fn default_max_context_tokens() -> u64 {
    8_000
}

fn default_summarisation_threshold() -> u64 {
    6_000
}

fn default_recent_window_minutes() -> i64 {
    10
}

fn default_rate_limit_window_ms() -> u64 {
    60_000
}

fn default_rate_limit_max_requests() -> u32 {
    100
}

fn default_chat_rate_limit() -> u32 {
    50
}

fn default_safety_threshold() -> f64 {
    0.95
}

fn default_turn_timeout_secs() -> u64 {
    120
}
