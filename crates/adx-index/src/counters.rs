use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use adx_types::DspStatus;

const DEFAULT_CAPACITY: usize = 10_000;
const NIL: usize = usize::MAX;

/// Live per-bidder record kinds held by the dynamic cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CounterValue {
    Int(i64),
    Status(StatusOverride),
    Budget(BudgetRecord),
}

/// Operational status override pushed at runtime, shadowing the static
/// definition document until the next reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusOverride {
    pub status: DspStatus,
    #[serde(default)]
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub daily_micros: i64,
    pub spent_micros: i64,
    pub remaining_micros: i64,
    pub updated_at: DateTime<Utc>,
}

struct Node {
    key: String,
    value: CounterValue,
    prev: usize,
    next: usize,
}

/// Bounded LRU over string keys. Nodes live in a Vec arena with an
/// intrusive doubly-linked recency list; `head` is most recent.
pub struct LruCache {
    capacity: usize,
    map: HashMap<String, usize>,
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    evictions: u64,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Self {
            capacity,
            map: HashMap::with_capacity(capacity.min(1024)),
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            evictions: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<&CounterValue> {
        let idx = *self.map.get(key)?;
        self.move_to_head(idx);
        Some(&self.nodes[idx].value)
    }

    pub fn set(&mut self, key: &str, value: CounterValue) {
        if let Some(&idx) = self.map.get(key) {
            self.nodes[idx].value = value;
            self.move_to_head(idx);
            return;
        }

        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Node {
                    key: key.to_string(),
                    value,
                    prev: NIL,
                    next: NIL,
                };
                idx
            }
            None => {
                self.nodes.push(Node {
                    key: key.to_string(),
                    value,
                    prev: NIL,
                    next: NIL,
                });
                self.nodes.len() - 1
            }
        };

        self.map.insert(key.to_string(), idx);
        self.push_head(idx);

        if self.map.len() > self.capacity {
            self.evict_tail();
        }
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(idx) = self.map.remove(key) {
            self.unlink(idx);
            self.free.push(idx);
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    fn push_head(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn move_to_head(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_head(idx);
    }

    fn evict_tail(&mut self) {
        let tail = self.tail;
        if tail == NIL {
            return;
        }
        let key = self.nodes[tail].key.clone();
        self.unlink(tail);
        self.map.remove(&key);
        self.free.push(tail);
        self.evictions += 1;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CountersMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_items: u64,
}

/// Thread-safe dynamic-state cache keyed by `qps:<id>`, `status:<id>`
/// and `budget:<id>`. A cold bidder evicted by the LRU reads back as
/// QPS 0, which admission treats as unthrottled.
pub struct DynamicCounters {
    lru: Mutex<LruCache>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DynamicCounters {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn qps(&self, dsp_id: &str) -> i64 {
        match self.get_int(&qps_key(dsp_id)) {
            Some(v) => v,
            None => 0,
        }
    }

    pub fn increment_qps(&self, dsp_id: &str) -> i64 {
        let key = qps_key(dsp_id);
        let mut lru = self.lru.lock();
        let next = match lru.get(&key) {
            Some(CounterValue::Int(v)) => v + 1,
            _ => 1,
        };
        lru.set(&key, CounterValue::Int(next));
        next
    }

    pub fn decrement_qps(&self, dsp_id: &str) -> i64 {
        let key = qps_key(dsp_id);
        let mut lru = self.lru.lock();
        let next = match lru.get(&key) {
            Some(CounterValue::Int(v)) => (v - 1).max(0),
            _ => 0,
        };
        lru.set(&key, CounterValue::Int(next));
        next
    }

    pub fn reset_qps(&self, dsp_id: &str) {
        self.lru.lock().set(&qps_key(dsp_id), CounterValue::Int(0));
    }

    pub fn status_override(&self, dsp_id: &str) -> Option<StatusOverride> {
        match self.get(&status_key(dsp_id)) {
            Some(CounterValue::Status(s)) => Some(s),
            _ => None,
        }
    }

    pub fn set_status_override(&self, dsp_id: &str, status: StatusOverride) {
        self.lru
            .lock()
            .set(&status_key(dsp_id), CounterValue::Status(status));
    }

    pub fn budget(&self, dsp_id: &str) -> Option<BudgetRecord> {
        match self.get(&budget_key(dsp_id)) {
            Some(CounterValue::Budget(b)) => Some(b),
            _ => None,
        }
    }

    pub fn set_budget(&self, dsp_id: &str, budget: BudgetRecord) {
        self.lru
            .lock()
            .set(&budget_key(dsp_id), CounterValue::Budget(budget));
    }

    pub fn get(&self, key: &str) -> Option<CounterValue> {
        let mut lru = self.lru.lock();
        match lru.get(key) {
            Some(v) => {
                let v = v.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: CounterValue) {
        self.lru.lock().set(key, value);
    }

    pub fn remove(&self, key: &str) {
        self.lru.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lru.lock().clear();
    }

    pub fn metrics(&self) -> CountersMetrics {
        let lru = self.lru.lock();
        CountersMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: lru.evictions,
            total_items: lru.len() as u64,
        }
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(CounterValue::Int(v)) => Some(v),
            _ => None,
        }
    }
}

impl Default for DynamicCounters {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn qps_key(dsp_id: &str) -> String {
    format!("qps:{dsp_id}")
}

fn status_key(dsp_id: &str) -> String {
    format!("status:{dsp_id}")
}

fn budget_key(dsp_id: &str) -> String {
    format!("budget:{dsp_id}")
}
