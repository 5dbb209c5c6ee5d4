use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use adx_exchange::config::AdxConfig;
use adx_exchange::core::{BroadcastConfig, Broadcaster, CircuitBreakerBank, CircuitConfig, HealthTracker, Pipeline};
use adx_exchange::index_manager::{IndexManager, IndexManagerConfig};
use adx_exchange::logging::setup_logging;
use adx_exchange::server::{build_router, AppState, ServerMetrics};
use adx_exchange::sspadapter::AdapterRegistry;
use adx_index::FsObjectStore;

#[derive(Parser, Debug)]
#[command(name = "adx_server", version, about = "Real-time ad exchange server")]
struct Cli {
    /// Config directory holding <run_type>.yaml (overrides CONFIG_PATH).
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Object-store root for the filesystem-backed definition store.
    #[arg(long, default_value = "dsp_store")]
    store_root: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AdxConfig::load(cli.config_dir.as_deref())
        .context("failed to load configuration")?;
    setup_logging(&config.logging).ok();
    info!(
        "starting adx server on {} with {} SSPs, {} static bidders",
        config.server.bind_addr(),
        config.ssps.len(),
        config.bidders.len()
    );

    let manager = Arc::new(IndexManager::new(
        Arc::new(FsObjectStore::new(&cli.store_root)),
        IndexManagerConfig {
            prefix: config.object_store.prefix.clone(),
            scan_interval: config.object_store.scan_interval(),
            shutdown_timeout: config.server.shutdown_timeout(),
            ..Default::default()
        },
    ));
    manager
        .clone()
        .start()
        .await
        .context("index manager startup failed")?;

    let health = Arc::new(HealthTracker::default());
    let breakers = Arc::new(CircuitBreakerBank::new(CircuitConfig::default()));
    let broadcaster = Arc::new(Broadcaster::new(
        health,
        breakers,
        BroadcastConfig {
            max_connections: config.server.max_connections,
            ..Default::default()
        },
    ));

    // Drop health records for bidders that have gone quiet.
    let gc_health = broadcaster.health().clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            ticker.tick().await;
            gc_health.cleanup_stale(std::time::Duration::from_secs(3600));
        }
    });

    let pipeline = Arc::new(Pipeline::standard(manager.clone(), broadcaster.clone()));
    let adapters = Arc::new(AdapterRegistry::new(&config.ssps));
    let live = Arc::new(AtomicBool::new(true));

    let state = AppState {
        adapters,
        manager: manager.clone(),
        pipeline,
        broadcaster,
        metrics: Arc::new(ServerMetrics::new()),
        live: live.clone(),
        started_at: Instant::now(),
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.server.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr()))?;
    info!("http: listening on {}", config.server.bind_addr());

    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {e}");
        }
        info!("shutdown signal received");
        live.store(false, Ordering::Relaxed);
    });

    serve.await.context("http server error")?;

    manager.shutdown().await;
    info!("adx server stopped");
    Ok(())
}
