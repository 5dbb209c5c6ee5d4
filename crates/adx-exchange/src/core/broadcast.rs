use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use adx_types::BidCandidate;

use crate::core::bidder::Bidder;
use crate::core::ctx::BidRequestCtx;
use crate::core::health::{CircuitBreakerBank, HealthTracker};
use crate::core::retry::{retry_with_deadline, RetryConfig};
use crate::error::BidderError;

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Counting-semaphore bound on concurrent bidder calls.
    pub max_connections: usize,
    /// Upper bound on how long past the SSP deadline the collector may
    /// run while stragglers finish recording.
    pub slack: Duration,
    pub retry: RetryConfig,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            slack: Duration::from_millis(50),
            retry: RetryConfig::default(),
        }
    }
}

/// Result of one bidder unit, kept for observability. `invoked` is
/// false when the deadline expired before the call could start, in
/// which case neither health nor circuit state was touched.
#[derive(Debug)]
pub struct BidderOutcome {
    pub bidder_id: String,
    pub latency: Duration,
    pub candidates: usize,
    pub error: Option<BidderError>,
    pub invoked: bool,
}

#[derive(Debug, Default)]
pub struct BroadcastResult {
    pub candidates: Vec<BidCandidate>,
    pub outcomes: Vec<BidderOutcome>,
}

impl BroadcastResult {
    pub fn success_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.invoked && o.error.is_none())
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.invoked && o.error.is_some())
            .count()
    }
}

/// Concurrent fan-out to a bidder set under the SSP deadline.
///
/// Each admitted bidder runs as its own spawned task: permit, per-call
/// timeout of `min(bidder timeout, deadline remaining)`, retry with
/// backoff, then exactly one health + circuit record for the attempted
/// call. Results stream back over an mpsc channel; the collector never
/// blocks past `deadline + slack`, and any task still in flight at
/// that point is aborted. Candidate order is unspecified.
pub struct Broadcaster {
    health: Arc<HealthTracker>,
    breakers: Arc<CircuitBreakerBank>,
    config: BroadcastConfig,
}

impl Broadcaster {
    pub fn new(
        health: Arc<HealthTracker>,
        breakers: Arc<CircuitBreakerBank>,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            health,
            breakers,
            config,
        }
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerBank> {
        &self.breakers
    }

    pub async fn broadcast(
        &self,
        ctx: &BidRequestCtx,
        bidders: &[Arc<dyn Bidder>],
    ) -> BroadcastResult {
        let admitted = self.admit(bidders);
        let mut result = BroadcastResult::default();
        if admitted.is_empty() {
            return result;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let shared_ctx = Arc::new(ctx.clone());
        let (tx, mut rx) = mpsc::channel(admitted.len());

        // One child task per admitted bidder.
        let mut handles = Vec::with_capacity(admitted.len());
        for bidder in admitted {
            let ctx = Arc::clone(&shared_ctx);
            let semaphore = Arc::clone(&semaphore);
            let health = Arc::clone(&self.health);
            let breakers = Arc::clone(&self.breakers);
            let retry = self.config.retry;
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let unit = call_bidder(ctx, bidder, semaphore, health, breakers, retry).await;
                let _ = tx.send(unit).await;
            }));
        }
        drop(tx);

        let hard_stop = tokio::time::Instant::from_std(ctx.deadline + self.config.slack);
        let collect = async {
            while let Some((candidates, outcome)) = rx.recv().await {
                result.candidates.extend(candidates);
                result.outcomes.push(outcome);
            }
        };

        // Deadline expiry is not an error: in-flight tasks are aborted
        // and accumulated results returned.
        if tokio::time::timeout_at(hard_stop, collect).await.is_err() {
            debug!(
                ssp = %ctx.ssp_id,
                request = %ctx.request.id,
                collected = result.outcomes.len(),
                "broadcast deadline expired, returning partial results"
            );
            for handle in &handles {
                handle.abort();
            }
        }

        result
    }

    /// Health- and circuit-gate the bidder set. Rejected bidders do not
    /// have their breaker or health state updated.
    fn admit(&self, bidders: &[Arc<dyn Bidder>]) -> Vec<Arc<dyn Bidder>> {
        bidders
            .iter()
            .filter(|b| {
                let id = &b.info().id;
                if !self.health.is_healthy(id) {
                    debug!(bidder = %id, "skipping unhealthy bidder");
                    return false;
                }
                if !self.breakers.allow(id) {
                    debug!(bidder = %id, "circuit open, skipping bidder");
                    return false;
                }
                true
            })
            .cloned()
            .collect()
    }
}

/// One bidder unit, run on its own task: acquire a permit, enforce the
/// per-call timeout, invoke with retry, record the outcome.
async fn call_bidder(
    ctx: Arc<BidRequestCtx>,
    bidder: Arc<dyn Bidder>,
    semaphore: Arc<Semaphore>,
    health: Arc<HealthTracker>,
    breakers: Arc<CircuitBreakerBank>,
    retry: RetryConfig,
) -> (Vec<BidCandidate>, BidderOutcome) {
    let id = bidder.info().id.clone();

    let Ok(_permit) = semaphore.acquire().await else {
        return (
            Vec::new(),
            BidderOutcome {
                bidder_id: id,
                latency: Duration::ZERO,
                candidates: 0,
                error: Some(BidderError::timeout("semaphore closed")),
                invoked: false,
            },
        );
    };

    let remaining = ctx.remaining();
    if remaining.is_zero() {
        return (
            Vec::new(),
            BidderOutcome {
                bidder_id: id,
                latency: Duration::ZERO,
                candidates: 0,
                error: Some(BidderError::timeout("deadline expired before call")),
                invoked: false,
            },
        );
    }

    let call_timeout = remaining.min(bidder.info().timeout);
    let attempt_deadline = Instant::now() + call_timeout;
    let started = Instant::now();

    let attempt = retry_with_deadline(attempt_deadline, &retry, || bidder.send(&ctx));

    let err = match tokio::time::timeout(call_timeout, attempt).await {
        Ok(Ok(candidates)) => {
            health.record_outcome(&id, true, None);
            breakers.record_success(&id);
            let count = candidates.len();
            return (
                candidates,
                BidderOutcome {
                    bidder_id: id,
                    latency: started.elapsed(),
                    candidates: count,
                    error: None,
                    invoked: true,
                },
            );
        }
        Ok(Err(err)) => err,
        Err(_) => BidderError::timeout(format!("bidder {id} exceeded {call_timeout:?}")),
    };

    warn!(bidder = %id, error = %err, "bidder call failed");
    health.record_outcome(&id, false, Some(&err.message));
    breakers.record_failure(&id);

    (
        Vec::new(),
        BidderOutcome {
            bidder_id: id,
            latency: started.elapsed(),
            candidates: 0,
            error: Some(err),
            invoked: true,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SspConfig;
    use crate::core::bidder::StubBidder;
    use crate::core::health::CircuitConfig;
    use crate::error::BidderErrorKind;
    use adx_types::{BidRequest, Impression};

    fn ctx_with_timeout(timeout_ms: u64) -> BidRequestCtx {
        let ssp: SspConfig =
            serde_yaml::from_str(&format!("id: s1\ntimeout_ms: {timeout_ms}")).unwrap();
        BidRequestCtx::new(
            BidRequest::new("r1", vec![Impression::banner("1", 320, 50)]),
            ssp,
        )
    }

    fn broadcaster() -> Broadcaster {
        Broadcaster::new(
            Arc::new(HealthTracker::default()),
            Arc::new(CircuitBreakerBank::default()),
            BroadcastConfig {
                retry: RetryConfig {
                    initial_delay: Duration::from_millis(1),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn collects_all_successful_bids() {
        let b = broadcaster();
        let bidders: Vec<Arc<dyn Bidder>> = vec![
            Arc::new(StubBidder::bidding("b1", 500_000)),
            Arc::new(StubBidder::bidding("b2", 700_000)),
        ];

        let result = b.broadcast(&ctx_with_timeout(3000), &bidders).await;
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failure_count(), 0);
    }

    #[tokio::test]
    async fn partial_failure_keeps_surviving_candidates() {
        let b = broadcaster();
        let slow = Arc::new(
            StubBidder::bidding("b3", 900_000).with_delay(Duration::from_millis(500)),
        );
        let bidders: Vec<Arc<dyn Bidder>> = vec![
            Arc::new(StubBidder::bidding("b1", 300_000).with_delay(Duration::from_millis(40))),
            Arc::new(StubBidder::failing("b2", BidderErrorKind::Protocol)),
            slow,
        ];

        let result = b.broadcast(&ctx_with_timeout(200), &bidders).await;

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].bidder_id(), "b1");

        let b2 = result
            .outcomes
            .iter()
            .find(|o| o.bidder_id == "b2")
            .unwrap();
        assert_eq!(b2.error.as_ref().unwrap().kind, BidderErrorKind::Protocol);

        let b3 = result
            .outcomes
            .iter()
            .find(|o| o.bidder_id == "b3")
            .unwrap();
        assert_eq!(b3.error.as_ref().unwrap().kind, BidderErrorKind::Timeout);

        // Failures recorded against health exactly once each.
        let health = b.health().get("b2").unwrap();
        assert_eq!(health.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn unhealthy_and_open_circuit_bidders_are_not_called() {
        let health = Arc::new(HealthTracker::new(1, 1));
        health.record_outcome("sick", false, Some("down"));

        let breakers = Arc::new(CircuitBreakerBank::new(CircuitConfig {
            open_cooldown: Duration::from_secs(60),
            ..Default::default()
        }));
        for _ in 0..5 {
            breakers.record_failure("tripped");
        }

        let b = Broadcaster::new(health, breakers, BroadcastConfig::default());
        let sick = Arc::new(StubBidder::bidding("sick", 100));
        let tripped = Arc::new(StubBidder::bidding("tripped", 100));
        let bidders: Vec<Arc<dyn Bidder>> = vec![sick.clone(), tripped.clone()];

        let result = b.broadcast(&ctx_with_timeout(500), &bidders).await;
        assert!(result.candidates.is_empty());
        assert!(result.outcomes.is_empty());
        assert_eq!(sick.calls(), 0);
        assert_eq!(tripped.calls(), 0);
    }

    #[tokio::test]
    async fn never_returns_after_deadline_plus_slack() {
        let b = broadcaster();
        let bidders: Vec<Arc<dyn Bidder>> = (0..4)
            .map(|i| {
                Arc::new(
                    StubBidder::bidding(format!("slow-{i}"), 100)
                        .with_delay(Duration::from_secs(5)),
                ) as Arc<dyn Bidder>
            })
            .collect();

        let ctx = ctx_with_timeout(100);
        let started = Instant::now();
        let result = b.broadcast(&ctx, &bidders).await;
        let elapsed = started.elapsed();

        assert!(result.candidates.is_empty());
        assert!(
            elapsed < Duration::from_millis(400),
            "broadcast took {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_within_call() {
        let b = broadcaster();
        let flaky = Arc::new(StubBidder::bidding("flaky", 250_000));
        flaky.push_outcome(crate::core::bidder::StubOutcome::Fail {
            kind: BidderErrorKind::Network,
        });

        let bidders: Vec<Arc<dyn Bidder>> = vec![flaky.clone()];
        let result = b.broadcast(&ctx_with_timeout(1000), &bidders).await;

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(flaky.calls(), 2);
        // The call as a whole succeeded, so health saw one success.
        assert!(b.health().is_healthy("flaky"));
    }
}
