//! Per-attempt outcome counters for the resilient executor.

use crate::error::RemoteError;
use crate::remote::circuit_breaker::CircuitState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct RemoteMetrics {
    attempts: AtomicU64,
    failed: AtomicU64,
    rate_limited: AtomicU64,
    permanent: AtomicU64,
    rejected: AtomicU64,
    latency_ns: AtomicU64,
}

impl RemoteMetrics {
    /// Accounts one attempt that reached the network. A cursor reset is a
    /// valid answer from the service and counts as a success.
    pub(crate) fn record_attempt(&self, outcome: Result<(), &RemoteError>, latency: Duration) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_ns.fetch_add(nanos, Ordering::Relaxed);

        let err = match outcome {
            Ok(()) | Err(RemoteError::CursorReset) => return,
            Err(err) => err,
        };
        self.failed.fetch_add(1, Ordering::Relaxed);
        if matches!(err, RemoteError::RateLimited { .. }) {
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
        }
        if err.kind().is_permanent() {
            self.permanent.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Calls refused by the breaker never reach the network.
    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, breaker_state: CircuitState) -> RemoteMetricsSnapshot {
        let total_requests = self.attempts.load(Ordering::Relaxed);
        let total_errors = self.failed.load(Ordering::Relaxed);
        let latency_ms = self.latency_ns.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        RemoteMetricsSnapshot {
            total_requests,
            total_errors,
            average_latency_ms: per_request(latency_ms, total_requests),
            error_rate: per_request(total_errors as f64, total_requests),
            total_rate_limited: self.rate_limited.load(Ordering::Relaxed),
            total_permanent: self.permanent.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            breaker_state,
        }
    }
}

fn per_request(total: f64, requests: u64) -> f64 {
    if requests == 0 {
        0.0
    } else {
        total / requests as f64
    }
}

/// Point-in-time view of remote call health. Rejected calls are not requests.
#[derive(Debug, Copy, Clone)]
pub struct RemoteMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
    pub total_rate_limited: u64,
    /// Failures no retry can fix, such as rejected credentials.
    pub total_permanent: u64,
    pub total_rejected: u64,
    pub breaker_state: CircuitState,
}
