use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::bidder::Bidder;
use crate::error::{AdxError, Result};

/// Thread-safe bidder id -> bidder mapping. Many readers on the request
/// path, one occasional writer (the index manager). `all` hands out an
/// O(n) copied snapshot so callers iterate without holding the lock.
#[derive(Default)]
pub struct BidderRegistry {
    bidders: RwLock<HashMap<String, Arc<dyn Bidder>>>,
}

impl BidderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bidder: Arc<dyn Bidder>) -> Result<()> {
        let id = bidder.info().id.clone();
        if id.is_empty() {
            return Err(AdxError::Internal("bidder id cannot be empty".to_string()));
        }

        let mut bidders = self.bidders.write();
        if bidders.contains_key(&id) {
            return Err(AdxError::Internal(format!(
                "bidder '{id}' is already registered"
            )));
        }
        bidders.insert(id, bidder);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> Result<()> {
        match self.bidders.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(AdxError::Internal(format!("bidder '{id}' not found"))),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Bidder>> {
        self.bidders.read().get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.bidders.read().contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.bidders.read().len()
    }

    /// Snapshot of all registered bidders.
    pub fn all(&self) -> HashMap<String, Arc<dyn Bidder>> {
        self.bidders.read().clone()
    }
}
