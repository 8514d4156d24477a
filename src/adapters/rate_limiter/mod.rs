//! Rate limiter adapters: in-process sliding window, Redis-backed shared
//! store, and the fail-open composition of the two.

mod fallback;
mod in_memory;
mod redis;

pub use self::redis::{RateStoreError, RedisRateLimiter};
pub use fallback::FallbackRateLimiter;
pub use in_memory::InMemoryRateLimiter;
