//! DSP targeting index subsystem: the inverted index used on the bid
//! hot path, the object-store definition loader that feeds it, the
//! on-disk snapshot, and the LRU-backed dynamic counters.

pub mod counters;
pub mod index;
pub mod loader;
pub mod snapshot;

pub use counters::{
    BudgetRecord, CounterValue, CountersMetrics, DynamicCounters, LruCache, StatusOverride,
};
pub use index::TargetingIndex;
pub use loader::{DefinitionLoader, FsObjectStore, ObjectStore, StoreError};
pub use snapshot::{load_snapshot, save_snapshot};
