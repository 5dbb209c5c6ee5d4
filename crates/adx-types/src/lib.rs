//! Shared canonical RTB types used across all components

pub mod dsp;
pub mod request;
pub mod response;

pub use dsp::{Condition, DspInfo, DspStatus, DspTargeting, Operator, TargetingClause};
pub use request::{Assignments, BidRequest, Device, Impression, UserInfo};
pub use response::{Bid, BidCandidate, BidResponse};

pub type BidderId = String;
pub type CpmMicros = i64; // CPM in integer micros (1 CPM = 1_000_000)
