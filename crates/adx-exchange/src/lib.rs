//! Real-time ad exchange: per-request bid orchestration under a hard
//! latency budget, concurrent DSP broadcast with per-bidder isolation,
//! and a hot-reloaded targeting index behind an atomic snapshot pair.

pub mod config;
pub mod core;
pub mod error;
pub mod index_manager;
pub mod logging;
pub mod server;
pub mod sspadapter;

pub use error::{AdxError, BidderError, BidderErrorKind, Result};
