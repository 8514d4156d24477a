//! In-process rate limiter.
//!
//! The authoritative sliding-window form: each key holds the sorted
//! timestamps of admitted requests; on every check, entries older than the
//! window are expired, the remainder counted, and the request admitted and
//! recorded when under the limit. Token budgets use a window-bounded counter
//! with a reset timestamp.
//!
//! Serves single-server deployments and the fail-open fallback when the
//! shared store is unreachable. It may under-count across instances in the
//! fallback role; that degradation is accepted and observable.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::foundation::{Clock, SystemClock, Timestamp};
use crate::ports::{RateDecision, RateKey, RateLimiter};

/// Roughly one check in a hundred sweeps dead keys.
const COMPACTION_PROBABILITY: f64 = 0.01;

/// Sliding-window state for request counting.
#[derive(Debug, Default)]
struct RequestWindow {
    /// Admission timestamps in ms, ascending.
    events: Vec<u64>,
}

/// Counter state for token budgets.
#[derive(Debug)]
struct TokenWindow {
    /// Tokens charged in the current window.
    used: u64,
    /// Window start in ms.
    window_start: u64,
    /// Window length in ms.
    window_ms: u64,
}

/// In-process sliding-window rate limiter.
pub struct InMemoryRateLimiter {
    requests: Mutex<HashMap<String, RequestWindow>>,
    tokens: Mutex<HashMap<String, TokenWindow>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRateLimiter {
    /// Creates a limiter on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a limiter on an injected clock (deterministic tests).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Opportunistically drops keys whose windows have fully expired.
    fn maybe_compact(&self, now_ms: u64, window_ms: u64) {
        if rand::random::<f64>() >= COMPACTION_PROBABILITY {
            return;
        }

        let horizon = now_ms.saturating_sub(window_ms);
        let mut requests = self.requests.lock().unwrap();
        requests.retain(|_, w| w.events.last().is_some_and(|&last| last > horizon));
        drop(requests);

        let mut tokens = self.tokens.lock().unwrap();
        tokens.retain(|_, w| w.window_start + w.window_ms > now_ms);
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_request(
        &self,
        key: &RateKey,
        window: Duration,
        max_requests: u32,
    ) -> RateDecision {
        let now = self.clock.now();
        let now_ms = now.as_unix_millis();
        let window_ms = window.as_millis() as u64;
        let horizon = now_ms.saturating_sub(window_ms);

        let decision = {
            let mut requests = self.requests.lock().unwrap();
            let state = requests.entry(key.as_str().to_string()).or_default();

            // Expire events older than the window.
            let first_live = state.events.partition_point(|&t| t <= horizon);
            state.events.drain(..first_live);

            let current = state.events.len() as u64;
            // The window resets for the caller when the oldest live event
            // leaves it.
            let reset_at = state
                .events
                .first()
                .map(|&oldest| Timestamp::from_unix_millis(oldest + window_ms))
                .unwrap_or_else(|| now.plus_millis(window_ms));

            if current >= max_requests as u64 {
                RateDecision::denied(reset_at, max_requests as u64, current)
            } else {
                state.events.push(now_ms);
                let current = current + 1;
                RateDecision::allowed(
                    (max_requests as u64).saturating_sub(current),
                    reset_at,
                    max_requests as u64,
                    current,
                )
            }
        };

        self.maybe_compact(now_ms, window_ms);
        decision
    }

    async fn check_tokens(
        &self,
        key: &RateKey,
        window: Duration,
        tokens_to_charge: u64,
        max_tokens: u64,
    ) -> RateDecision {
        let now = self.clock.now();
        let now_ms = now.as_unix_millis();
        let window_ms = window.as_millis() as u64;

        let mut tokens = self.tokens.lock().unwrap();
        let state = tokens
            .entry(key.as_str().to_string())
            .or_insert_with(|| TokenWindow {
                used: 0,
                window_start: now_ms,
                window_ms,
            });

        // Reset an expired window.
        if now_ms >= state.window_start + state.window_ms {
            state.used = 0;
            state.window_start = now_ms;
            state.window_ms = window_ms;
        }

        let reset_at = Timestamp::from_unix_millis(state.window_start + state.window_ms);

        if state.used + tokens_to_charge > max_tokens {
            return RateDecision::denied(reset_at, max_tokens, state.used);
        }

        // Charge only on admission.
        state.used += tokens_to_charge;
        RateDecision::allowed(
            max_tokens - state.used,
            reset_at,
            max_tokens,
            state.used,
        )
    }
}
