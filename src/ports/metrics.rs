//! Metrics sink port.
//!
//! The core emits a handful of operational counters (rate-limit fallback,
//! relay congestion, provider fallback, safety blocks). Exporters are out of
//! scope; the sink is an explicit service object instantiated once at startup
//! and passed to components.

use std::collections::HashMap;
use std::sync::Mutex;

/// Counter names emitted by the core.
pub mod counters {
    /// Shared rate-limit store failed; the in-process fallback decided.
    pub const RATE_LIMIT_FALLBACK: &str = "rate_limit.fallback";
    /// Rate limiter internal error; the decision failed open.
    pub const RATE_LIMIT_ERROR: &str = "rate_limit.error";
    /// A relay buffer overflowed and dropped its oldest frame.
    pub const RELAY_CONGESTION: &str = "relay.congestion";
    /// A turn fell back to the canned safe response.
    pub const PROVIDER_FALLBACK: &str = "provider.fallback";
    /// An inbound screen blocked a turn.
    pub const SAFETY_BLOCK: &str = "safety.block";
    /// A summarisation pass committed.
    pub const SUMMARISATION_RUN: &str = "summarisation.run";
}

/// Sink for operational counters.
pub trait MetricsSink: Send + Sync {
    /// Increments a counter by one.
    fn increment(&self, name: &'static str);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl MetricsSink for NoOpMetrics {
    fn increment(&self, _name: &'static str) {}
}

/// In-process sink that keeps counts in a map; doubles as the production
/// sink (counters surface through logs) and the test observer.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counts: Mutex<HashMap<&'static str, u64>>,
}

impl InMemoryMetrics {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value of a counter.
    pub fn get(&self, name: &'static str) -> u64 {
        *self.counts.lock().unwrap().get(name).unwrap_or(&0)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &'static str) {
        let mut counts = self.counts.lock().unwrap();
        *counts.entry(name).or_insert(0) += 1;
    }
}
