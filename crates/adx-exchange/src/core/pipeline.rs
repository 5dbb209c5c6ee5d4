use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use adx_types::{Assignments, BidCandidate, BidResponse, Impression};

use crate::core::bidder::Bidder;
use crate::core::broadcast::Broadcaster;
use crate::core::ctx::BidRequestCtx;
use crate::core::features;
use crate::error::{AdxError, Result};

/// Creative categories the exchange refuses to serve.
pub const BLOCKED_CATEGORIES: &[&str] = &["adult", "gambling", "weapons"];

/// Resolves the bidders eligible for a set of assignments from one
/// consistent (index, registry) snapshot. Implemented by the index
/// manager; stubbed in tests.
pub trait BidderSource: Send + Sync {
    fn eligible(&self, assignments: &Assignments) -> Vec<Arc<dyn Bidder>>;
}

pub enum StageFlow {
    Continue,
    /// Stop the pipeline with whatever response is already set.
    ShortCircuit,
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &mut BidRequestCtx) -> Result<StageFlow>;
}

/// Ordered stage runner. Stages fail fast: the first error aborts the
/// request and surfaces to the adapter; non-fatal trouble goes into the
/// context's soft-error list instead.
pub struct Pipeline {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn PipelineStage>>) -> Self {
        Self { stages }
    }

    /// The standard stage order: validate, enrich, target, broadcast,
    /// filter, rank, pack.
    pub fn standard(source: Arc<dyn BidderSource>, broadcaster: Arc<Broadcaster>) -> Self {
        Self::new(vec![
            Box::new(ValidateStage),
            Box::new(FeatureStage),
            Box::new(TargetStage { source }),
            Box::new(BroadcastStage { broadcaster }),
            Box::new(FilterStage),
            Box::new(RankStage),
            Box::new(PackStage),
        ])
    }

    pub async fn run(&self, ctx: &mut BidRequestCtx) -> Result<()> {
        for stage in &self.stages {
            ctx.push_stage(stage.name());
            match stage.process(ctx).await? {
                StageFlow::Continue => {}
                StageFlow::ShortCircuit => break,
            }
        }

        if ctx.response.is_none() {
            ctx.response = Some(BidResponse::empty(&ctx.request.id));
        }
        Ok(())
    }
}

pub struct ValidateStage;

#[async_trait]
impl PipelineStage for ValidateStage {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn process(&self, ctx: &mut BidRequestCtx) -> Result<StageFlow> {
        if ctx.ssp_id.is_empty() {
            return Err(AdxError::BadRequest("missing SSP id".to_string()));
        }
        if ctx.request.imp.is_empty() {
            return Err(AdxError::BadRequest(
                "request carries no impression slots".to_string(),
            ));
        }
        Ok(StageFlow::Continue)
    }
}

pub struct FeatureStage;

#[async_trait]
impl PipelineStage for FeatureStage {
    fn name(&self) -> &'static str {
        "enrich"
    }

    async fn process(&self, ctx: &mut BidRequestCtx) -> Result<StageFlow> {
        features::complete(&mut ctx.request);
        Ok(StageFlow::Continue)
    }
}

pub struct TargetStage {
    pub source: Arc<dyn BidderSource>,
}

#[async_trait]
impl PipelineStage for TargetStage {
    fn name(&self) -> &'static str {
        "target"
    }

    async fn process(&self, ctx: &mut BidRequestCtx) -> Result<StageFlow> {
        let eligible = self.source.eligible(&ctx.request.assignments);
        if eligible.is_empty() {
            debug!(request = %ctx.request.id, "no eligible bidders, returning empty response");
            ctx.response = Some(BidResponse::empty(&ctx.request.id));
            return Ok(StageFlow::ShortCircuit);
        }
        ctx.eligible = eligible;
        Ok(StageFlow::Continue)
    }
}

pub struct BroadcastStage {
    pub broadcaster: Arc<Broadcaster>,
}

#[async_trait]
impl PipelineStage for BroadcastStage {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn process(&self, ctx: &mut BidRequestCtx) -> Result<StageFlow> {
        let eligible = std::mem::take(&mut ctx.eligible);
        let result = self.broadcaster.broadcast(ctx, &eligible).await;
        ctx.eligible = eligible;

        for outcome in &result.outcomes {
            if let Some(err) = &outcome.error {
                ctx.push_soft_error(format!("bidder {}: {}", outcome.bidder_id, err));
            }
        }
        ctx.bidder_successes = result.success_count();
        ctx.bidder_failures = result.failure_count();
        ctx.candidates = result.candidates;
        Ok(StageFlow::Continue)
    }
}

pub struct FilterStage;

#[async_trait]
impl PipelineStage for FilterStage {
    fn name(&self) -> &'static str {
        "filter"
    }

    async fn process(&self, ctx: &mut BidRequestCtx) -> Result<StageFlow> {
        ctx.filtered = filter_candidates(ctx.candidates.clone(), &ctx.request.imp);
        Ok(StageFlow::Continue)
    }
}

pub struct RankStage;

#[async_trait]
impl PipelineStage for RankStage {
    fn name(&self) -> &'static str {
        "rank"
    }

    async fn process(&self, ctx: &mut BidRequestCtx) -> Result<StageFlow> {
        rank_candidates(&mut ctx.filtered);
        Ok(StageFlow::Continue)
    }
}

pub struct PackStage;

#[async_trait]
impl PipelineStage for PackStage {
    fn name(&self) -> &'static str {
        "pack"
    }

    async fn process(&self, ctx: &mut BidRequestCtx) -> Result<StageFlow> {
        // First-price auction: the top-ranked candidate wins at its own
        // quoted CPM.
        let response = match ctx.filtered.first() {
            Some(winner) => BidResponse {
                request_id: ctx.request.id.clone(),
                bids: vec![winner.bid.clone()],
            },
            None => BidResponse::empty(&ctx.request.id),
        };
        ctx.response = Some(response);
        Ok(StageFlow::Continue)
    }
}

/// Drop candidates that violate policy: non-positive price, blocked
/// creative categories, size mismatch with the slot they target, and
/// duplicate creatives (best CPM survives, ties to the smaller bidder
/// id, so the outcome does not depend on candidate order).
pub fn filter_candidates(candidates: Vec<BidCandidate>, imps: &[Impression]) -> Vec<BidCandidate> {
    let slots: HashMap<&str, &Impression> =
        imps.iter().map(|i| (i.id.as_str(), i)).collect();

    let passing: Vec<BidCandidate> = candidates
        .into_iter()
        .filter(|c| c.cpm_micros > 0)
        .filter(|c| {
            !c.bid
                .categories
                .iter()
                .any(|cat| BLOCKED_CATEGORIES.contains(&cat.as_str()))
        })
        .filter(|c| match slots.get(c.bid.imp_id.as_str()) {
            None => false,
            Some(imp) => slot_accepts(imp, c),
        })
        .collect();

    // Creative dedup: keep the best candidate per creative id.
    let mut best: HashMap<&str, &BidCandidate> = HashMap::new();
    for c in passing.iter().filter(|c| !c.bid.creative_id.is_empty()) {
        best.entry(c.bid.creative_id.as_str())
            .and_modify(|cur| {
                if (c.cpm_micros, std::cmp::Reverse(c.bidder_id()))
                    > (cur.cpm_micros, std::cmp::Reverse(cur.bidder_id()))
                {
                    *cur = c;
                }
            })
            .or_insert(c);
    }

    passing
        .iter()
        .filter(|c| {
            c.bid.creative_id.is_empty()
                || best
                    .get(c.bid.creative_id.as_str())
                    .is_some_and(|b| std::ptr::eq(*b, *c))
        })
        .cloned()
        .collect()
}

fn slot_accepts(imp: &Impression, candidate: &BidCandidate) -> bool {
    let bid = &candidate.bid;
    // Unknown creative dimensions pass; known ones must fit the slot.
    if bid.width > 0 && imp.width > 0 && bid.width != imp.width {
        return false;
    }
    if bid.height > 0 && imp.height > 0 && bid.height != imp.height {
        return false;
    }
    true
}

/// Stable total order: CPM descending, bidder priority descending,
/// bidder id ascending.
pub fn rank_candidates(candidates: &mut [BidCandidate]) {
    candidates.sort_by(|a, b| {
        b.cpm_micros
            .cmp(&a.cpm_micros)
            .then(b.priority.cmp(&a.priority))
            .then(a.bidder_id().cmp(b.bidder_id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use adx_types::Bid;

    fn candidate(bidder: &str, cpm: i64) -> BidCandidate {
        candidate_full(bidder, cpm, 0, &format!("cr-{bidder}"))
    }

    fn candidate_full(bidder: &str, cpm: i64, priority: i32, creative: &str) -> BidCandidate {
        BidCandidate::new(
            Bid {
                bidder_id: bidder.to_string(),
                imp_id: "1".to_string(),
                cpm_micros: cpm,
                adm: String::new(),
                creative_id: creative.to_string(),
                width: 320,
                height: 50,
                categories: Vec::new(),
            },
            priority,
        )
    }

    fn slot() -> Vec<Impression> {
        vec![Impression::banner("1", 320, 50)]
    }

    #[test]
    fn rank_orders_by_cpm_priority_then_id() {
        let mut candidates = vec![
            candidate_full("b_c", 500, 0, "c1"),
            candidate_full("b_a", 700, 0, "c2"),
            candidate_full("b_b", 700, 5, "c3"),
            candidate_full("b_d", 700, 5, "c4"),
        ];
        rank_candidates(&mut candidates);

        let order: Vec<&str> = candidates.iter().map(|c| c.bidder_id()).collect();
        assert_eq!(order, vec!["b_b", "b_d", "b_a", "b_c"]);
    }

    #[test]
    fn filter_drops_non_positive_prices() {
        let got = filter_candidates(
            vec![candidate("b1", 0), candidate("b2", -5), candidate("b3", 10)],
            &slot(),
        );
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].bidder_id(), "b3");
    }

    #[test]
    fn filter_drops_blocked_categories() {
        let mut bad = candidate("b1", 100);
        bad.bid.categories = vec!["gambling".to_string()];
        let got = filter_candidates(vec![bad, candidate("b2", 50)], &slot());
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].bidder_id(), "b2");
    }

    #[test]
    fn filter_drops_size_mismatch_and_unknown_slot() {
        let mut wrong_size = candidate("b1", 100);
        wrong_size.bid.width = 728;
        wrong_size.bid.height = 90;

        let mut wrong_slot = candidate("b2", 100);
        wrong_slot.bid.imp_id = "missing".to_string();

        let mut r#unsized = candidate("b3", 100);
        r#unsized.bid.width = 0;
        r#unsized.bid.height = 0;

        let got = filter_candidates(vec![wrong_size, wrong_slot, r#unsized], &slot());
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].bidder_id(), "b3");
    }

    #[test]
    fn filter_dedups_creatives_keeping_best_cpm() {
        let got = filter_candidates(
            vec![
                candidate_full("b1", 100, 0, "shared"),
                candidate_full("b2", 300, 0, "shared"),
                candidate_full("b3", 200, 0, "other"),
            ],
            &slot(),
        );
        let mut ids: Vec<&str> = got.iter().map(|c| c.bidder_id()).collect();
        ids.sort();
        assert_eq!(ids, vec!["b2", "b3"]);
    }

    #[test]
    fn creative_dedup_is_order_independent() {
        let forward = filter_candidates(
            vec![
                candidate_full("b1", 100, 0, "shared"),
                candidate_full("b2", 300, 0, "shared"),
            ],
            &slot(),
        );
        let reverse = filter_candidates(
            vec![
                candidate_full("b2", 300, 0, "shared"),
                candidate_full("b1", 100, 0, "shared"),
            ],
            &slot(),
        );
        assert_eq!(forward[0].bidder_id(), reverse[0].bidder_id());
    }

    #[test]
    fn filter_and_rank_commute_on_per_candidate_rules() {
        let candidates = vec![
            candidate("b1", 500),
            candidate("b2", 0),
            candidate("b3", 900),
            candidate("b4", -1),
            candidate("b5", 700),
        ];

        let mut filtered_then_ranked = filter_candidates(candidates.clone(), &slot());
        rank_candidates(&mut filtered_then_ranked);

        let mut ranked = candidates;
        rank_candidates(&mut ranked);
        let ranked_then_filtered = filter_candidates(ranked, &slot());

        assert_eq!(filtered_then_ranked, ranked_then_filtered);
    }
}
