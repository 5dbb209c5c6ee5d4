use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use adx_types::{Bid, BidCandidate, BidResponse, DspInfo};

use crate::core::ctx::BidRequestCtx;
use crate::error::{BidderError, BidderErrorKind};

/// Static identity of a callable DSP endpoint. All mutable per-bidder
/// state (QPS window, health, circuit) lives outside the bidder.
#[derive(Debug, Clone)]
pub struct BidderInfo {
    pub id: String,
    pub endpoint: String,
    pub qps_limit: u32,
    pub timeout: Duration,
    pub priority: i32,
}

/// A callable DSP endpoint. Implementations must honor cancellation of
/// the caller-enforced deadline and must not mutate the request.
#[async_trait]
pub trait Bidder: Send + Sync {
    fn info(&self) -> &BidderInfo;

    async fn send(&self, ctx: &BidRequestCtx) -> Result<Vec<BidCandidate>, BidderError>;
}

/// POSTs the canonical request to the DSP endpoint and parses a
/// canonical response. Stateless; the reqwest client is shared.
pub struct HttpBidder {
    info: BidderInfo,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpBidder {
    pub fn new(info: BidderInfo, auth_token: Option<String>, client: reqwest::Client) -> Self {
        Self {
            info,
            auth_token,
            client,
        }
    }

    pub fn from_definition(info: &DspInfo, client: reqwest::Client) -> Self {
        Self::new(
            BidderInfo {
                id: info.dsp_id.clone(),
                endpoint: info.endpoint.clone(),
                qps_limit: info.qps_limit,
                timeout: info.timeout(),
                priority: info.priority,
            },
            info.auth_token.clone(),
            client,
        )
    }

    fn classify(err: &reqwest::Error) -> BidderErrorKind {
        if err.is_timeout() {
            BidderErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            BidderErrorKind::Network
        } else if err.is_decode() {
            BidderErrorKind::Protocol
        } else {
            BidderErrorKind::Network
        }
    }
}

#[async_trait]
impl Bidder for HttpBidder {
    fn info(&self) -> &BidderInfo {
        &self.info
    }

    async fn send(&self, ctx: &BidRequestCtx) -> Result<Vec<BidCandidate>, BidderError> {
        let mut req = self
            .client
            .post(&self.info.endpoint)
            .timeout(self.info.timeout)
            .json(&ctx.request);

        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BidderError::new(Self::classify(&e), e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(BidderError::new(
                BidderErrorKind::RateLimit,
                format!("bidder {} rate limited", self.info.id),
            ));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(BidderError::protocol(format!(
                "bidder {} returned HTTP {}",
                self.info.id, status
            )));
        }

        let body: BidResponse = resp
            .json()
            .await
            .map_err(|e| BidderError::protocol(e.to_string()))?;

        Ok(body
            .bids
            .into_iter()
            .map(|mut bid| {
                // The exchange attributes bids, not the DSP payload.
                bid.bidder_id = self.info.id.clone();
                BidCandidate::new(bid, self.info.priority)
            })
            .collect())
    }
}

/// Scripted bidder used by tests: fixed delay, then either a bid at a
/// fixed CPM or a failure. A pushed outcome queue overrides the default
/// for call-by-call scripting.
pub struct StubBidder {
    info: BidderInfo,
    delay: Duration,
    default_outcome: StubOutcome,
    script: Mutex<VecDeque<StubOutcome>>,
    calls: AtomicU64,
}

#[derive(Debug, Clone)]
pub enum StubOutcome {
    Bid { cpm_micros: i64 },
    Fail { kind: BidderErrorKind },
    Empty,
}

impl StubBidder {
    pub fn new(id: impl Into<String>, outcome: StubOutcome) -> Self {
        let id = id.into();
        Self {
            info: BidderInfo {
                endpoint: format!("stub://{id}"),
                id,
                qps_limit: 0,
                timeout: Duration::from_millis(2000),
                priority: 0,
            },
            delay: Duration::ZERO,
            default_outcome: outcome,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn bidding(id: impl Into<String>, cpm_micros: i64) -> Self {
        Self::new(id, StubOutcome::Bid { cpm_micros })
    }

    pub fn failing(id: impl Into<String>, kind: BidderErrorKind) -> Self {
        Self::new(id, StubOutcome::Fail { kind })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.info.priority = priority;
        self
    }

    pub fn push_outcome(&self, outcome: StubOutcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn make_candidate(&self, ctx: &BidRequestCtx, cpm_micros: i64) -> BidCandidate {
        let imp_id = ctx
            .request
            .imp
            .first()
            .map(|i| i.id.clone())
            .unwrap_or_default();
        let (width, height) = ctx
            .request
            .imp
            .first()
            .map(|i| (i.width, i.height))
            .unwrap_or((0, 0));

        BidCandidate::new(
            Bid {
                bidder_id: self.info.id.clone(),
                imp_id,
                cpm_micros,
                adm: format!("<ad from {}>", self.info.id),
                creative_id: format!("cr-{}", self.info.id),
                width,
                height,
                categories: Vec::new(),
            },
            self.info.priority,
        )
    }
}

#[async_trait]
impl Bidder for StubBidder {
    fn info(&self) -> &BidderInfo {
        &self.info
    }

    async fn send(&self, ctx: &BidRequestCtx) -> Result<Vec<BidCandidate>, BidderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone());

        match outcome {
            StubOutcome::Bid { cpm_micros } => Ok(vec![self.make_candidate(ctx, cpm_micros)]),
            StubOutcome::Empty => Ok(Vec::new()),
            StubOutcome::Fail { kind } => Err(BidderError::new(
                kind,
                format!("stub {} forced failure", self.info.id),
            )),
        }
    }
}
