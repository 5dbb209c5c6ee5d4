use std::sync::Arc;
use std::time::{Duration, Instant};

use adx_types::{BidCandidate, BidRequest, BidResponse};

use crate::config::SspConfig;
use crate::core::bidder::Bidder;

/// Fallback SSP deadline when the config omits one.
pub const DEFAULT_SSP_TIMEOUT: Duration = Duration::from_millis(3000);

/// Mutable per-request envelope. Created at adapter entry, carried
/// through every pipeline stage, dropped after the response is
/// serialized. The canonical request itself is immutable; everything
/// the stages produce accumulates here. Cloned once per broadcast so
/// each bidder task can run detached from the pipeline's borrow.
#[derive(Clone)]
pub struct BidRequestCtx {
    pub request: BidRequest,
    pub ssp_id: String,
    pub ssp_config: SspConfig,

    pub received_at: Instant,
    /// Absolute wall time after which the request must be finalized.
    pub deadline: Instant,

    /// Bidders eligible for this request, resolved from one consistent
    /// (index, registry) snapshot by the targeting stage.
    pub eligible: Vec<Arc<dyn Bidder>>,
    pub candidates: Vec<BidCandidate>,
    pub filtered: Vec<BidCandidate>,
    pub response: Option<BidResponse>,
    pub bidder_successes: usize,
    pub bidder_failures: usize,

    /// Stage trace plus non-fatal errors, for observability.
    pub stages: Vec<&'static str>,
    pub soft_errors: Vec<String>,
}

impl BidRequestCtx {
    pub fn new(request: BidRequest, ssp_config: SspConfig) -> Self {
        let received_at = Instant::now();
        let timeout = if ssp_config.timeout_ms > 0 {
            ssp_config.timeout()
        } else {
            DEFAULT_SSP_TIMEOUT
        };

        Self {
            request,
            ssp_id: ssp_config.id.clone(),
            ssp_config,
            received_at,
            deadline: received_at + timeout,
            eligible: Vec::new(),
            candidates: Vec::new(),
            filtered: Vec::new(),
            response: None,
            bidder_successes: 0,
            bidder_failures: 0,
            stages: Vec::new(),
            soft_errors: Vec::new(),
        }
    }

    pub fn push_stage(&mut self, name: &'static str) {
        self.stages.push(name);
    }

    pub fn push_soft_error(&mut self, err: impl Into<String>) {
        self.soft_errors.push(err.into());
    }

    /// Time left before the SSP deadline; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }
}
