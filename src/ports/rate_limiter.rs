//! Rate limiting port - admit-or-reject decisions under two orthogonal
//! budgets per key.
//!
//! Requests are counted with a sliding window over event timestamps; token
//! budgets use a window-bounded counter. Implementations must be fail-open:
//! an internal error yields an allow decision with full remaining quota and
//! an error metric, never a rejection.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::domain::foundation::{Timestamp, UserId};

/// Port for rate limiting operations.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Checks the request budget for `key`, recording the request when
    /// admitted.
    async fn check_request(
        &self,
        key: &RateKey,
        window: Duration,
        max_requests: u32,
    ) -> RateDecision;

    /// Checks the token budget for `key`, charging `tokens_to_charge` only
    /// when the decision is allow.
    async fn check_tokens(
        &self,
        key: &RateKey,
        window: Duration,
        tokens_to_charge: u64,
        max_tokens: u64,
    ) -> RateDecision;
}

/// Namespaced rate-limit key. The namespace convention is the caller's:
/// `ip:<addr>`, `user:<id>`, `chat:<user_id>`, `tokens:<user_id>`.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RateKey(String);

impl RateKey {
    /// Creates a key from an already-namespaced string.
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Creates an IP-scoped key.
    pub fn ip(addr: &str) -> Self {
        Self(format!("ip:{}", addr))
    }

    /// Creates a user-scoped key.
    pub fn user(user_id: &UserId) -> Self {
        Self(format!("user:{}", user_id))
    }

    /// Creates the per-user chat-turn key.
    pub fn chat(user_id: &UserId) -> Self {
        Self(format!("chat:{}", user_id))
    }

    /// Creates the per-user token-budget key.
    pub fn tokens(user_id: &UserId) -> Self {
        Self(format!("tokens:{}", user_id))
    }

    /// Returns the namespaced key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateDecision {
    /// True when the request/charge was admitted.
    pub allowed: bool,
    /// Budget remaining in the current window after this check.
    pub remaining: u64,
    /// When the window resets.
    pub reset_at: Timestamp,
    /// The configured budget.
    pub total: u64,
    /// Usage counted in the current window, including this check if admitted.
    pub current: u64,
}

impl RateDecision {
    /// Creates an allow decision.
    pub fn allowed(remaining: u64, reset_at: Timestamp, total: u64, current: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            total,
            current,
        }
    }

    /// Creates a deny decision.
    pub fn denied(reset_at: Timestamp, total: u64, current: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            total,
            current,
        }
    }

    /// The fail-open decision: allow with the full budget remaining.
    ///
    /// Returned whenever a backing store fails; under-counting beats refusing
    /// traffic on infrastructure failure.
    pub fn fail_open(total: u64, now: Timestamp, window: Duration) -> Self {
        Self {
            allowed: true,
            remaining: total,
            reset_at: now.plus_millis(window.as_millis() as u64),
            total,
            current: 0,
        }
    }

    /// Seconds until the window resets, measured from `now`, at least 1.
    pub fn retry_after_secs(&self, now: Timestamp) -> u64 {
        let delta = self.reset_at.duration_since(&now).num_seconds();
        delta.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_constructors_apply_namespaces() {
        let user = UserId::new("u1").unwrap();
        assert_eq!(RateKey::ip("10.0.0.1").as_str(), "ip:10.0.0.1");
        assert_eq!(RateKey::user(&user).as_str(), "user:u1");
        assert_eq!(RateKey::chat(&user).as_str(), "chat:u1");
        assert_eq!(RateKey::tokens(&user).as_str(), "tokens:u1");
    }

    #[test]
    fn fail_open_allows_with_full_budget() {
        let now = Timestamp::now();
        let decision = RateDecision::fail_open(50, now, Duration::from_secs(60));

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 50);
        assert_eq!(decision.current, 0);
        assert!(decision.reset_at.is_after(&now));
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let now = Timestamp::now();
        let decision = RateDecision::denied(now, 10, 10);
        assert_eq!(decision.retry_after_secs(now), 1);

        let decision = RateDecision::denied(now.plus_secs(30), 10, 10);
        assert_eq!(decision.retry_after_secs(now), 30);
    }
}
