use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide serving counters, rendered as Prometheus-style text by
/// the `/metrics` endpoint. Relaxed ordering throughout; scrape
/// consistency is not transactional.
#[derive(Default)]
pub struct ServerMetrics {
    pub requests_total: AtomicU64,
    pub bid_responses_total: AtomicU64,
    pub no_bid_total: AtomicU64,
    pub bad_request_total: AtomicU64,
    pub internal_error_total: AtomicU64,
    pub bidder_success_total: AtomicU64,
    pub bidder_failure_total: AtomicU64,

    // Broadcast latency buckets (ms): <10, <50, <100, <500, >=500.
    lat_b0: AtomicU64,
    lat_b1: AtomicU64,
    lat_b2: AtomicU64,
    lat_b3: AtomicU64,
    lat_b4: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_bid(&self) {
        self.bid_responses_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_no_bid(&self) {
        self.no_bid_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_bad_request(&self) {
        self.bad_request_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_internal_error(&self) {
        self.internal_error_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bidder_outcomes(&self, successes: u64, failures: u64) {
        self.bidder_success_total.fetch_add(successes, Ordering::Relaxed);
        self.bidder_failure_total.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn record_broadcast_latency(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        let bucket = if ms < 10 {
            &self.lat_b0
        } else if ms < 50 {
            &self.lat_b1
        } else if ms < 100 {
            &self.lat_b2
        } else if ms < 500 {
            &self.lat_b3
        } else {
            &self.lat_b4
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    pub fn prometheus_text(&self) -> String {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let bids = self.bid_responses_total.load(Ordering::Relaxed);
        let no_bids = self.no_bid_total.load(Ordering::Relaxed);
        let bad = self.bad_request_total.load(Ordering::Relaxed);
        let internal = self.internal_error_total.load(Ordering::Relaxed);
        let ok = self.bidder_success_total.load(Ordering::Relaxed);
        let failed = self.bidder_failure_total.load(Ordering::Relaxed);

        let b0 = self.lat_b0.load(Ordering::Relaxed);
        let b1 = self.lat_b1.load(Ordering::Relaxed);
        let b2 = self.lat_b2.load(Ordering::Relaxed);
        let b3 = self.lat_b3.load(Ordering::Relaxed);
        let b4 = self.lat_b4.load(Ordering::Relaxed);

        format!(
            "\
# TYPE adx_bid_requests_total counter
adx_bid_requests_total {requests}
# TYPE adx_bid_responses_total counter
adx_bid_responses_total {bids}
# TYPE adx_no_bid_total counter
adx_no_bid_total {no_bids}
# TYPE adx_bad_request_total counter
adx_bad_request_total {bad}
# TYPE adx_internal_error_total counter
adx_internal_error_total {internal}
# TYPE adx_bidder_success_total counter
adx_bidder_success_total {ok}
# TYPE adx_bidder_failure_total counter
adx_bidder_failure_total {failed}
# TYPE adx_broadcast_latency_bucket counter
adx_broadcast_latency_bucket{{le=\"10\"}} {b0}
adx_broadcast_latency_bucket{{le=\"50\"}} {b1}
adx_broadcast_latency_bucket{{le=\"100\"}} {b2}
adx_broadcast_latency_bucket{{le=\"500\"}} {b3}
adx_broadcast_latency_bucket{{le=\"+Inf\"}} {b4}
"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_counters_as_text() {
        let m = ServerMetrics::new();
        m.inc_request();
        m.inc_bid();
        m.record_bidder_outcomes(2, 1);
        m.record_broadcast_latency(Duration::from_millis(42));

        let text = m.prometheus_text();
        assert!(text.contains("adx_bid_requests_total 1"));
        assert!(text.contains("adx_bidder_failure_total 1"));
        assert!(text.contains("adx_broadcast_latency_bucket{le=\"50\"} 1"));
    }
}
