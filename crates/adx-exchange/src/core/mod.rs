pub mod bidder;
pub mod broadcast;
pub mod ctx;
pub mod features;
pub mod health;
pub mod pipeline;
pub mod registry;
pub mod retry;

pub use bidder::{Bidder, BidderInfo, HttpBidder, StubBidder, StubOutcome};
pub use broadcast::{BidderOutcome, BroadcastConfig, BroadcastResult, Broadcaster};
pub use ctx::{BidRequestCtx, DEFAULT_SSP_TIMEOUT};
pub use health::{
    CircuitBreaker, CircuitBreakerBank, CircuitConfig, CircuitState, HealthRecord, HealthTracker,
};
pub use pipeline::{BidderSource, Pipeline, PipelineStage, StageFlow};
pub use registry::BidderRegistry;
pub use retry::{retry_with_deadline, RetryConfig};
