//! Redis-backed rate limiter for multi-server deployments.
//!
//! Requests use a sorted set per key: scores are admission timestamps in ms,
//! trimmed with `ZREMRANGEBYSCORE` before counting with `ZCARD` and admitting
//! with `ZADD`. Token budgets use a plain counter with `PX` expiry. Commands
//! are issued individually rather than in a Lua script; the brief race at
//! window boundaries is accepted.

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::foundation::Timestamp;
use crate::ports::{RateDecision, RateKey};

/// Errors from the shared counter store.
#[derive(Debug, thiserror::Error)]
pub enum RateStoreError {
    /// The store is unreachable or a command failed.
    #[error("rate-limit store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for RateStoreError {
    fn from(e: redis::RedisError) -> Self {
        RateStoreError::Unavailable(e.to_string())
    }
}

/// Redis-backed sliding-window rate limiter.
///
/// Exposes fallible checks; [`super::FallbackRateLimiter`] wraps them with
/// the in-process fallback and the fail-open policy.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: MultiplexedConnection,
}

impl RedisRateLimiter {
    /// Creates a new Redis rate limiter on an established connection.
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }

    fn request_key(key: &RateKey) -> String {
        format!("ratelimit:req:{}", key)
    }

    fn token_key(key: &RateKey) -> String {
        format!("ratelimit:tok:{}", key)
    }

    /// Sliding-window request check against the sorted set.
    pub async fn check_request(
        &self,
        key: &RateKey,
        window: Duration,
        max_requests: u32,
    ) -> Result<RateDecision, RateStoreError> {
        let redis_key = Self::request_key(key);
        let now = Timestamp::now();
        let now_ms = now.as_unix_millis();
        let window_ms = window.as_millis() as u64;
        let horizon = now_ms.saturating_sub(window_ms);

        let mut conn = self.conn.clone();

        // Trim expired events, then count the live window.
        let _: () = conn
            .zrembyscore(&redis_key, 0u64, horizon)
            .await
            .map_err(RateStoreError::from)?;
        let current: u64 = conn.zcard(&redis_key).await.map_err(RateStoreError::from)?;

        // Oldest live event anchors the reset time.
        let oldest: Vec<(String, u64)> = conn
            .zrange_withscores(&redis_key, 0, 0)
            .await
            .map_err(RateStoreError::from)?;
        let reset_at = oldest
            .first()
            .map(|(_, score)| Timestamp::from_unix_millis(score + window_ms))
            .unwrap_or_else(|| now.plus_millis(window_ms));

        if current >= max_requests as u64 {
            return Ok(RateDecision::denied(reset_at, max_requests as u64, current));
        }

        // Admit: record the event and keep the key from leaking.
        let member = format!("{}:{}", now_ms, Uuid::new_v4());
        let _: () = conn
            .zadd(&redis_key, member, now_ms)
            .await
            .map_err(RateStoreError::from)?;
        let _: () = conn
            .pexpire(&redis_key, window_ms as i64)
            .await
            .map_err(RateStoreError::from)?;

        let current = current + 1;
        Ok(RateDecision::allowed(
            (max_requests as u64).saturating_sub(current),
            reset_at,
            max_requests as u64,
            current,
        ))
    }

    /// Window-bounded token budget check against a counter with TTL.
    pub async fn check_tokens(
        &self,
        key: &RateKey,
        window: Duration,
        tokens_to_charge: u64,
        max_tokens: u64,
    ) -> Result<RateDecision, RateStoreError> {
        let redis_key = Self::token_key(key);
        let now = Timestamp::now();
        let window_ms = window.as_millis() as u64;

        let mut conn = self.conn.clone();

        let used: Option<u64> = conn.get(&redis_key).await.map_err(RateStoreError::from)?;
        let used = used.unwrap_or(0);

        let ttl_ms: i64 = conn.pttl(&redis_key).await.map_err(RateStoreError::from)?;
        let reset_at = if ttl_ms > 0 {
            now.plus_millis(ttl_ms as u64)
        } else {
            now.plus_millis(window_ms)
        };

        if used + tokens_to_charge > max_tokens {
            return Ok(RateDecision::denied(reset_at, max_tokens, used));
        }

        // Charge on admission, preserving the window's remaining TTL.
        let charged: u64 = conn
            .incr(&redis_key, tokens_to_charge)
            .await
            .map_err(RateStoreError::from)?;
        if ttl_ms <= 0 {
            let _: () = conn
                .pexpire(&redis_key, window_ms as i64)
                .await
                .map_err(RateStoreError::from)?;
        }

        Ok(RateDecision::allowed(
            max_tokens.saturating_sub(charged),
            reset_at,
            max_tokens,
            charged,
        ))
    }
}

impl std::fmt::Debug for RedisRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimiter").finish_non_exhaustive()
    }
}
