//! In-process counters for proxied traffic

use crate::error::ForwardError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the proxy path, exposed on `/metrics`
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    proxied_requests: AtomicU64,
    route_not_found: AtomicU64,
    upstream_timeouts: AtomicU64,
    upstream_unreachable: AtomicU64,
    upstream_unexpected: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub proxied_requests: u64,
    pub route_not_found: u64,
    pub upstream_timeouts: u64,
    pub upstream_unreachable: u64,
    pub upstream_unexpected: u64,
}

impl BridgeMetrics {
    /// Record a request entering the proxy path
    pub fn record_request(&self) {
        self.proxied_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_route_not_found(&self) {
        self.route_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, err: &ForwardError) {
        let counter = match err {
            ForwardError::Timeout => &self.upstream_timeouts,
            ForwardError::Unreachable(_) => &self.upstream_unreachable,
            ForwardError::Unexpected(_) => &self.upstream_unexpected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            proxied_requests: self.proxied_requests.load(Ordering::Relaxed),
            route_not_found: self.route_not_found.load(Ordering::Relaxed),
            upstream_timeouts: self.upstream_timeouts.load(Ordering::Relaxed),
            upstream_unreachable: self.upstream_unreachable.load(Ordering::Relaxed),
            upstream_unexpected: self.upstream_unexpected.load(Ordering::Relaxed),
        }
    }
}
