//! Per-endpoint health state
//!
//! Passive results (forwarded requests) and active results (probes) feed the
//! same counter. Reaching the threshold ejects the endpoint until the
//! cooldown deadline passes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Consecutive failure counter plus ejection deadline
#[derive(Debug, Default)]
pub struct EndpointHealth {
    consecutive_failures: AtomicU32,
    ejected_until: Mutex<Option<Instant>>,
}

/// Outcome of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Counted, still below the threshold
    Counted(u32),
    /// Threshold reached, endpoint ejected
    Ejected,
    /// Already ejected; the deadline is left alone
    AlreadyEjected,
}

impl EndpointHealth {
    /// Fresh, healthy state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the endpoint may be selected at `now`
    pub fn is_available(&self, now: Instant) -> bool {
        match *self.ejected_until.lock() {
            Some(until) => now >= until,
            None => true,
        }
    }

    /// Ejection deadline, if one is still pending at `now`
    pub fn ejected_until(&self, now: Instant) -> Option<Instant> {
        self.ejected_until.lock().filter(|until| *until > now)
    }

    /// Current consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Reset the failure streak
    ///
    /// An ejection in progress still runs to its deadline.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// Count one failure, ejecting once `threshold` consecutive failures accumulate
    pub fn record_failure(&self, threshold: u32, cooldown: Duration, now: Instant) -> FailureOutcome {
        let mut ejected_until = self.ejected_until.lock();
        if ejected_until.is_some_and(|until| until > now) {
            return FailureOutcome::AlreadyEjected;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= threshold {
            *ejected_until = Some(now + cooldown);
            self.consecutive_failures.store(0, Ordering::Release);
            FailureOutcome::Ejected
        } else {
            FailureOutcome::Counted(failures)
        }
    }

    /// Point-in-time view for status output
    pub fn status(&self, now: Instant) -> HealthStatus {
        let ejected_for = self.ejected_until(now).map(|until| until - now);
        HealthStatus {
            healthy: ejected_for.is_none(),
            consecutive_failures: self.consecutive_failures(),
            ejected_for_ms: ejected_for.map(|d| d.as_millis() as u64),
        }
    }
}

/// Serializable health view of one endpoint
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// Selectable right now
    pub healthy: bool,
    /// Current failure streak
    pub consecutive_failures: u32,
    /// Remaining cooldown, if ejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ejected_for_ms: Option<u64>,
}
