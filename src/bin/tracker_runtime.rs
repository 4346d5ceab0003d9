//! Tracker Runtime
//!
//! Connects to the telemetry feed, tracks every announced node and writes a
//! history snapshot each interval. Any feed error ends the process with a
//! non-zero exit code; a supervisor restart resubscribes and rebuilds state.
//!
//! Usage:
//!   cargo run --release --bin tracker_runtime
//!
//! Environment variables: see `TrackerConfig::from_env`.

use dotenv::dotenv;
use log::{error, info, warn};
use node_telemetry_tracker::config::{BackendType, TrackerConfig};
use node_telemetry_tracker::feed::{FeedClient, FeedConfig};
use node_telemetry_tracker::logging::init_logging;
use node_telemetry_tracker::scheduler::snapshot_scheduler_task;
use node_telemetry_tracker::store::memory::DEFAULT_HISTORY_LIMIT;
use node_telemetry_tracker::store::{MemoryNodeStore, NodeStore, SqliteNodeStore};
use node_telemetry_tracker::tracker::NodeTracker;
use std::sync::Arc;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let config = TrackerConfig::from_env()?;

    // wss:// needs a process-wide crypto provider
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("⚠️  A rustls crypto provider was already installed");
    }

    info!("🚀 Starting telemetry tracker");
    info!("   ├─ Feed: {}", config.feed_uri);
    info!("   ├─ Chain: {}", config.chain_name);
    info!("   ├─ Snapshot interval: {}s", config.snapshot_interval.as_secs());
    info!("   ├─ Ping interval: {}ms", config.ping_interval.as_millis());
    info!(
        "   └─ Location retry: {} x {}ms",
        config.location_retry.max_attempts,
        config.location_retry.delay.as_millis()
    );

    let store: Arc<dyn NodeStore> = match config.backend {
        BackendType::Sqlite => Arc::new(SqliteNodeStore::open(&config.db_path)?),
        BackendType::Memory => {
            warn!(
                "⚠️  Memory backend: nothing is persisted, history capped at {} entries",
                DEFAULT_HISTORY_LIMIT
            );
            Arc::new(MemoryNodeStore::new())
        }
    };
    info!("✅ Store ready ({}, {})", store.backend_type(), config.db_path);

    match store.latest_durable_id().await {
        Ok(latest) => info!("   └─ Latest durable node id: {}", latest),
        Err(e) => warn!("⚠️  Could not read latest durable node id: {}", e),
    }

    let tracker = NodeTracker::new(store.clone(), config.location_retry);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let scheduler = tokio::spawn(snapshot_scheduler_task(
        tracker.registry().clone(),
        store.clone(),
        config.snapshot_interval,
        shutdown_rx,
    ));

    let client = FeedClient::new(FeedConfig::from_tracker_config(&config), tracker);

    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::select! {
        err = client.run() => {
            error!("❌ Feed session ended: {}", err);
            std::process::exit(1);
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("❌ Failed to listen for CTRL+C: {}", e);
            }
            info!("⚠️  Shutting down, writing final snapshot...");
        }
    }

    // The scheduler finishes any in-flight flush, then writes the last one
    let _ = shutdown_tx.send(());
    match scheduler.await {
        Ok(report) => info!(
            "✅ Tracker stopped ({} nodes, {} written, {} failed)",
            report.tracked, report.written, report.failed
        ),
        Err(e) => error!("❌ Snapshot scheduler failed: {}", e),
    }

    Ok(())
}
