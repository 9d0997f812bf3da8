//! Gateway metrics
//!
//! Lock-free atomic counters, served as a JSON snapshot on `/metrics`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for the request pipeline
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    requests_forwarded: AtomicU64,
    requests_failed: AtomicU64,
    auth_rejected: AtomicU64,
    no_route: AtomicU64,
    upstream_retries: AtomicU64,
    /// Exponential moving average of upstream latency in microseconds
    avg_latency_us: AtomicU64,
}

impl AtomicMetrics {
    /// Create a new metrics collector with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the exponential moving average latency
    ///
    /// Uses a 90% weight for the current average and 10% for the new sample.
    pub fn update_latency_us(&self, latency_us: u64) {
        let current = self.avg_latency_us.load(Ordering::Relaxed);
        let new_avg = if current == 0 {
            latency_us
        } else {
            (current.saturating_mul(9).saturating_add(latency_us)) / 10
        };
        self.avg_latency_us.store(new_avg, Ordering::Relaxed);
    }

    /// A response was relayed from upstream
    pub fn inc_requests_forwarded(&self) {
        self.requests_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Upstream exchange failed (502/503/504)
    pub fn inc_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Identity verification rejected the request
    pub fn inc_auth_rejected(&self) {
        self.auth_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// No route matched
    pub fn inc_no_route(&self) {
        self.no_route.fetch_add(1, Ordering::Relaxed);
    }

    /// Another endpoint was tried after a connect failure
    pub fn inc_upstream_retries(&self) {
        self.upstream_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of current metrics
    ///
    /// Each counter is read atomically; the set as a whole is not.
    /// `jwks_fetches` comes from the key cache, which counts its own fetches.
    pub fn snapshot(&self, jwks_fetches: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_forwarded: self.requests_forwarded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            auth_rejected: self.auth_rejected.load(Ordering::Relaxed),
            no_route: self.no_route.load(Ordering::Relaxed),
            upstream_retries: self.upstream_retries.load(Ordering::Relaxed),
            jwks_fetches,
            average_latency_ms: self.avg_latency_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Snapshot of gateway metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Responses relayed from upstream
    pub requests_forwarded: u64,
    /// Upstream exchanges that failed
    pub requests_failed: u64,
    /// Requests rejected by identity verification
    pub auth_rejected: u64,
    /// Requests with no matching route
    pub no_route: u64,
    /// Retries against another endpoint
    pub upstream_retries: u64,
    /// JWKS documents fetched from the identity provider
    pub jwks_fetches: u64,
    /// Average upstream latency in milliseconds
    pub average_latency_ms: f64,
}

impl MetricsSnapshot {
    /// Share of upstream exchanges that succeeded, as a percentage
    ///
    /// Returns `None` if nothing has been forwarded yet.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.requests_forwarded + self.requests_failed;
        if total == 0 {
            None
        } else {
            Some((self.requests_forwarded as f64 / total as f64) * 100.0)
        }
    }
}
