//! Shared-store rate limiting with in-process fallback.
//!
//! Delegates to Redis when configured and reachable; on any store failure the
//! in-process sliding window decides instead. The fallback may under-count
//! across instances - an accepted fail-open degradation, observable through
//! the `rate_limit.fallback` counter.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::ports::{counters, MetricsSink, RateDecision, RateKey, RateLimiter};

use super::{InMemoryRateLimiter, RedisRateLimiter};

/// Production rate limiter: shared store first, process-local fallback.
pub struct FallbackRateLimiter {
    shared: Option<RedisRateLimiter>,
    local: InMemoryRateLimiter,
    metrics: Arc<dyn MetricsSink>,
}

impl FallbackRateLimiter {
    /// Creates a limiter with a shared store and a local fallback.
    pub fn new(shared: Option<RedisRateLimiter>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            shared,
            local: InMemoryRateLimiter::new(),
            metrics,
        }
    }

    /// Creates a purely process-local limiter (no shared store configured).
    pub fn local_only(metrics: Arc<dyn MetricsSink>) -> Self {
        Self::new(None, metrics)
    }

    fn record_fallback(&self, key: &RateKey, err: &super::RateStoreError) {
        self.metrics.increment(counters::RATE_LIMIT_FALLBACK);
        tracing::warn!(
            key = %key,
            error = %err,
            "rate-limit store unavailable, deciding from in-process fallback"
        );
    }
}

#[async_trait]
impl RateLimiter for FallbackRateLimiter {
    async fn check_request(
        &self,
        key: &RateKey,
        window: Duration,
        max_requests: u32,
    ) -> RateDecision {
        if let Some(shared) = &self.shared {
            match shared.check_request(key, window, max_requests).await {
                Ok(decision) => return decision,
                Err(err) => self.record_fallback(key, &err),
            }
        }
        self.local.check_request(key, window, max_requests).await
    }

    async fn check_tokens(
        &self,
        key: &RateKey,
        window: Duration,
        tokens_to_charge: u64,
        max_tokens: u64,
    ) -> RateDecision {
        if let Some(shared) = &self.shared {
            match shared
                .check_tokens(key, window, tokens_to_charge, max_tokens)
                .await
            {
                Ok(decision) => return decision,
                Err(err) => self.record_fallback(key, &err),
            }
        }
        self.local
            .check_tokens(key, window, tokens_to_charge, max_tokens)
            .await
    }
}
