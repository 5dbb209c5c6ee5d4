use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use adx_index::{
    load_snapshot, save_snapshot, CountersMetrics, DefinitionLoader, DynamicCounters, ObjectStore,
    TargetingIndex,
};
use adx_types::{Assignments, DspInfo};

use crate::core::bidder::{Bidder, HttpBidder};
use crate::core::pipeline::BidderSource;
use crate::core::registry::BidderRegistry;
use crate::error::{AdxError, Result};

#[derive(Debug, Clone)]
pub struct IndexManagerConfig {
    pub prefix: String,
    pub index_path: PathBuf,
    pub scan_interval: Duration,
    pub qps_reset_interval: Duration,
    pub shutdown_timeout: Duration,
    pub counters_capacity: usize,
}

impl Default for IndexManagerConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            index_path: PathBuf::from("dsp_index.dat"),
            scan_interval: Duration::from_secs(30),
            qps_reset_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            counters_capacity: 10_000,
        }
    }
}

/// One internally consistent pair: every doc id in the index resolves
/// in the bidder map. Published as a whole under a pointer swap so the
/// request path never observes a half-updated state.
pub struct IndexSnapshot {
    pub index: TargetingIndex,
    pub bidders: HashMap<String, Arc<dyn Bidder>>,
}

impl IndexSnapshot {
    fn empty() -> Self {
        Self {
            index: TargetingIndex::build(&HashMap::new()),
            bidders: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerMetrics {
    pub scan_count: u64,
    pub error_count: u64,
    pub last_scan_unix_ms: i64,
    pub indexed_docs: usize,
    pub registered_bidders: usize,
    pub cache: CountersMetrics,
}

/// Owns the definition loader, the targeting index, the bidder registry
/// and the dynamic counters. Rebuilds on an interval and reconciles the
/// registry against the definition set; readers always see a consistent
/// (index, registry) snapshot.
pub struct IndexManager {
    loader: DefinitionLoader,
    counters: Arc<DynamicCounters>,
    registry: Arc<BidderRegistry>,
    client: reqwest::Client,
    config: IndexManagerConfig,

    snapshot: RwLock<Arc<IndexSnapshot>>,
    definitions: Mutex<HashMap<String, DspInfo>>,

    scan_count: AtomicU64,
    error_count: AtomicU64,
    last_scan_unix_ms: AtomicI64,

    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexManager {
    pub fn new(store: Arc<dyn ObjectStore>, config: IndexManagerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            loader: DefinitionLoader::new(store, config.prefix.clone()),
            counters: Arc::new(DynamicCounters::new(config.counters_capacity)),
            registry: Arc::new(BidderRegistry::new()),
            client: reqwest::Client::new(),
            config,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::empty())),
            definitions: Mutex::new(HashMap::new()),
            scan_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_scan_unix_ms: AtomicI64::new(0),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<BidderRegistry> {
        &self.registry
    }

    pub fn counters(&self) -> &Arc<DynamicCounters> {
        &self.counters
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.read().clone()
    }

    /// Initial load plus the background scan and QPS-reset loops.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        info!("starting index manager");
        self.initial_load().await?;

        let mut tasks = self.tasks.lock();

        let mgr = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(mgr.config.scan_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => mgr.scan_and_update().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("scan loop stopped");
        }));

        let mgr = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(mgr.config.qps_reset_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => mgr.reset_qps_counters(),
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("qps reset loop stopped");
        }));

        info!("index manager started");
        Ok(())
    }

    /// Cancel the loops and wait up to the shutdown timeout for them to
    /// drain, then abort whatever is left.
    pub async fn shutdown(&self) {
        info!("stopping index manager");
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;

        let mut aborted = 0;
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!("aborted {aborted} index manager loops that did not drain in time");
        }
        info!("index manager stopped");
    }

    async fn initial_load(&self) -> Result<()> {
        if let Some(definitions) = load_snapshot(&self.config.index_path) {
            info!(
                "loaded {} DSP definitions from index snapshot",
                definitions.len()
            );
            self.reconcile_and_publish(definitions, false);
            return Ok(());
        }

        info!("no usable index snapshot, building from object store");
        let definitions = self.loader.read_all().await.map_err(|e| {
            AdxError::Internal(format!("initial DSP load failed: {e}"))
        })?;
        info!("loaded {} DSP definitions from object store", definitions.len());

        self.reconcile_and_publish(definitions, true);
        self.mark_scan();
        Ok(())
    }

    /// One scan-loop iteration: re-read the definition set; rebuild and
    /// republish only when something material changed. Recoverable
    /// store errors are logged and counted, never fatal.
    pub async fn scan_and_update(&self) {
        let definitions = match self.loader.read_all().await {
            Ok(d) => d,
            Err(e) => {
                error!("definition scan failed: {e}");
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if !self.changed(&definitions) {
            self.mark_scan();
            return;
        }

        info!("definition set changed, rebuilding index ({} docs)", definitions.len());
        self.reconcile_and_publish(definitions, true);
        self.mark_scan();
    }

    fn changed(&self, new_defs: &HashMap<String, DspInfo>) -> bool {
        let current = self.definitions.lock();
        if current.len() != new_defs.len() {
            return true;
        }
        new_defs.iter().any(|(id, doc)| {
            current
                .get(id)
                .map_or(true, |prev| prev.materially_differs(doc))
        })
    }

    /// Build the new (index, bidder map) pair, reconcile the registry,
    /// and swap the published snapshot. Unchanged bidders keep their
    /// existing instances.
    fn reconcile_and_publish(&self, definitions: HashMap<String, DspInfo>, persist: bool) {
        let previous = self.definitions.lock().clone();
        let mut bidders: HashMap<String, Arc<dyn Bidder>> = HashMap::new();

        for (id, doc) in definitions.iter().filter(|(_, d)| d.status.is_active()) {
            let unchanged = previous
                .get(id)
                .is_some_and(|prev| !prev.materially_differs(doc));

            let bidder = match (unchanged, self.registry.get(id)) {
                (true, Some(existing)) => existing,
                (_, existing) => {
                    if existing.is_some() {
                        let _ = self.registry.unregister(id);
                    }
                    let fresh: Arc<dyn Bidder> =
                        Arc::new(HttpBidder::from_definition(doc, self.client.clone()));
                    if let Err(e) = self.registry.register(fresh.clone()) {
                        warn!("failed to register bidder {id}: {e}");
                    } else {
                        info!("registered bidder: {} ({})", id, doc.dsp_name);
                    }
                    fresh
                }
            };
            bidders.insert(id.clone(), bidder);
        }

        // Bidders whose documents disappeared or went non-active.
        for id in self.registry.all().keys() {
            if !bidders.contains_key(id) {
                if let Err(e) = self.registry.unregister(id) {
                    warn!("failed to unregister bidder {id}: {e}");
                } else {
                    info!("unregistered bidder: {id}");
                }
            }
        }

        let index = TargetingIndex::build(&definitions);
        let snapshot = Arc::new(IndexSnapshot { index, bidders });
        *self.snapshot.write() = snapshot;
        *self.definitions.lock() = definitions;

        if persist {
            let defs = self.definitions.lock();
            if let Err(e) = save_snapshot(&self.config.index_path, &defs) {
                warn!("failed to persist index snapshot: {e}");
            }
        }
    }

    fn reset_qps_counters(&self) {
        let snapshot = self.snapshot();
        for id in snapshot.bidders.keys() {
            self.counters.reset_qps(id);
        }
        info!("QPS counters reset for {} bidders", snapshot.bidders.len());
    }

    fn mark_scan(&self) {
        self.scan_count.fetch_add(1, Ordering::Relaxed);
        self.last_scan_unix_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn metrics(&self) -> ManagerMetrics {
        let snapshot = self.snapshot();
        ManagerMetrics {
            scan_count: self.scan_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed)
                + self.loader.error_count(),
            last_scan_unix_ms: self.last_scan_unix_ms.load(Ordering::Relaxed),
            indexed_docs: snapshot.index.len(),
            registered_bidders: self.registry.count(),
            cache: self.counters.metrics(),
        }
    }
}

impl BidderSource for IndexManager {
    /// Targeting retrieval plus dynamic admission: status overrides,
    /// exhausted budgets and the per-minute QPS window all veto a
    /// bidder here, before the broadcaster sees it.
    fn eligible(&self, assignments: &Assignments) -> Vec<Arc<dyn Bidder>> {
        let snapshot = self.snapshot();
        let ids = snapshot.index.retrieve(assignments);

        ids.into_iter()
            .filter_map(|id| {
                let doc = snapshot.index.get(&id)?;

                if let Some(over) = self.counters.status_override(&id) {
                    if !over.status.is_active() {
                        return None;
                    }
                }
                if let Some(budget) = self.counters.budget(&id) {
                    if budget.remaining_micros <= 0 {
                        return None;
                    }
                }
                if doc.qps_limit > 0 {
                    let window_cap = doc.qps_limit as i64 * 60;
                    if self.counters.increment_qps(&id) > window_cap {
                        return None;
                    }
                }

                snapshot.bidders.get(&id).cloned()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adx_index::{BudgetRecord, FsObjectStore, StatusOverride};
    use adx_types::DspStatus;
    use std::path::Path;

    async fn write_dsp(dir: &Path, id: &str, status: &str, extra: &str) {
        let body = format!(
            r#"{{"dsp_id": "{id}", "endpoint": "http://{id}.test/bid", "status": "{status}"{extra}}}"#
        );
        tokio::fs::write(dir.join(format!("{id}.json")), body)
            .await
            .unwrap();
    }

    fn manager_for(dir: &Path, index_path: PathBuf) -> Arc<IndexManager> {
        Arc::new(IndexManager::new(
            Arc::new(FsObjectStore::new(dir)),
            IndexManagerConfig {
                index_path,
                scan_interval: Duration::from_millis(50),
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn initial_load_builds_consistent_pair() {
        let store = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        write_dsp(store.path(), "d1", "active", "").await;
        write_dsp(store.path(), "d2", "inactive", "").await;

        let mgr = manager_for(store.path(), scratch.path().join("dsp_index.dat"));
        mgr.initial_load().await.unwrap();

        let snap = mgr.snapshot();
        assert_eq!(snap.index.len(), 1);
        assert!(snap.bidders.contains_key("d1"));
        assert!(mgr.registry().has("d1"));
        assert!(!mgr.registry().has("d2"));

        // Every doc id in the index resolves in the bidder map.
        for doc in snap.index.all_active() {
            assert!(snap.bidders.contains_key(&doc.dsp_id));
        }
    }

    #[tokio::test]
    async fn scan_picks_up_new_and_deactivated_bidders() {
        let store = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        write_dsp(store.path(), "d1", "active", "").await;

        let mgr = manager_for(store.path(), scratch.path().join("dsp_index.dat"));
        mgr.initial_load().await.unwrap();
        let d1_before = mgr.registry().get("d1").unwrap();

        write_dsp(store.path(), "d2", "active", "").await;
        mgr.scan_and_update().await;

        assert!(mgr.registry().has("d2"));
        // Unchanged bidder instance was not re-created.
        let d1_after = mgr.registry().get("d1").unwrap();
        assert!(Arc::ptr_eq(&d1_before, &d1_after));

        write_dsp(store.path(), "d2", "inactive", "").await;
        mgr.scan_and_update().await;
        assert!(!mgr.registry().has("d2"));
        assert!(!mgr.snapshot().index.contains("d2"));
    }

    #[tokio::test]
    async fn unchanged_input_publishes_nothing() {
        let store = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        write_dsp(store.path(), "d1", "active", "").await;

        let mgr = manager_for(store.path(), scratch.path().join("dsp_index.dat"));
        mgr.initial_load().await.unwrap();

        let before = mgr.snapshot();
        mgr.scan_and_update().await;
        let after = mgr.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn startup_falls_back_to_disk_snapshot() {
        let store = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let index_path = scratch.path().join("dsp_index.dat");
        write_dsp(store.path(), "d1", "active", "").await;

        // First boot persists a snapshot.
        let mgr = manager_for(store.path(), index_path.clone());
        mgr.initial_load().await.unwrap();
        drop(mgr);

        // Second boot reads it back even with an empty store.
        let empty_store = tempfile::tempdir().unwrap();
        let mgr = manager_for(empty_store.path(), index_path);
        mgr.initial_load().await.unwrap();
        assert!(mgr.snapshot().index.contains("d1"));
    }

    #[tokio::test]
    async fn eligible_applies_dynamic_vetoes() {
        let store = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        write_dsp(store.path(), "d1", "active", "").await;
        write_dsp(store.path(), "d2", "active", "").await;
        write_dsp(store.path(), "d3", "active", r#", "qps_limit": 1"#).await;

        let mgr = manager_for(store.path(), scratch.path().join("dsp_index.dat"));
        mgr.initial_load().await.unwrap();

        mgr.counters().set_status_override(
            "d1",
            StatusOverride {
                status: DspStatus::Blocked,
                reason: "manual".to_string(),
                updated_at: chrono::Utc::now(),
            },
        );
        mgr.counters().set_budget(
            "d2",
            BudgetRecord {
                daily_micros: 1_000,
                spent_micros: 1_000,
                remaining_micros: 0,
                updated_at: chrono::Utc::now(),
            },
        );

        let assignments = Assignments::new();
        // d3 allows qps_limit * 60 calls per window, then drops out.
        for _ in 0..60 {
            let eligible = mgr.eligible(&assignments);
            assert_eq!(eligible.len(), 1);
            assert_eq!(eligible[0].info().id, "d3");
        }
        assert!(mgr.eligible(&assignments).is_empty());

        mgr.counters().reset_qps("d3");
        assert_eq!(mgr.eligible(&assignments).len(), 1);
    }
}
