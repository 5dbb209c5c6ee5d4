use serde::{Deserialize, Serialize};

use crate::CpmMicros;

/// Canonical bid response built at the end of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidResponse {
    pub request_id: String,
    #[serde(default)]
    pub bids: Vec<Bid>,
}

/// One winning (or candidate) bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub bidder_id: String,
    pub imp_id: String,
    pub cpm_micros: CpmMicros,
    /// Ad markup or a creative reference.
    #[serde(default)]
    pub adm: String,
    #[serde(default)]
    pub creative_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Bid plus auction metadata, produced by bidders and consumed by the
/// filter/rank stages. Ordered by CPM descending after ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct BidCandidate {
    pub bid: Bid,
    pub cpm_micros: CpmMicros,
    pub priority: i32,
}

impl BidResponse {
    pub fn empty(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            bids: Vec::new(),
        }
    }

    pub fn is_no_bid(&self) -> bool {
        self.bids.is_empty()
    }
}

impl BidCandidate {
    pub fn new(bid: Bid, priority: i32) -> Self {
        let cpm_micros = bid.cpm_micros;
        Self {
            bid,
            cpm_micros,
            priority,
        }
    }

    pub fn bidder_id(&self) -> &str {
        &self.bid.bidder_id
    }
}
