//! Snapshot scheduler
//!
//! Periodically materializes the registry into one history entry per
//! tracked node. Each flush:
//! 1. Locks the registry ONCE, reads every node and resets its accumulators
//! 2. Releases the lock BEFORE any store I/O
//! 3. Looks up startup times and appends the history entries
//!
//! The scheduler awaits each flush before waiting for the next tick, and
//! the shutdown flush runs on the same task, so two flushes never overlap.

use crate::store::NodeStore;
use crate::tracker::registry::{lock_registry, SharedRegistry};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Nodes tracked when the snapshot was taken
    pub tracked: usize,
    pub written: usize,
    pub failed: usize,
}

/// Take a snapshot of the registry and append it to the store
///
/// A failed append loses that node's interval (the accumulators were
/// already reset) but never affects the next one.
pub async fn flush_snapshot(
    registry: &SharedRegistry,
    store: &dyn NodeStore,
    now_ms: i64,
) -> FlushReport {
    let pending = lock_registry(registry).take_snapshot();

    let mut report = FlushReport {
        tracked: pending.len(),
        ..FlushReport::default()
    };

    for snapshot in pending {
        let durable_id = snapshot.durable_id;

        let last_startup_time = match store.find_node(durable_id).await {
            Ok(record) => record.and_then(|node| node.last_startup_time),
            Err(e) => {
                log::warn!("⚠️  Could not load node {} for uptime: {}", durable_id, e);
                None
            }
        };

        let entry = snapshot.into_entry(now_ms, last_startup_time);
        match store.append_history(&entry).await {
            Ok(()) => report.written += 1,
            Err(e) => {
                report.failed += 1;
                log::error!("❌ Failed to append history for node {}: {}", durable_id, e);
            }
        }
    }

    report
}

/// Flush scheduler task - runs until `shutdown` fires
///
/// The first flush happens one full interval after start. Ticks missed
/// while a slow flush is running are skipped rather than queued. Shutdown is
/// only observed between flushes: an in-flight flush completes, then one
/// final flush runs and its report is returned. A dropped sender counts as
/// shutdown.
pub async fn snapshot_scheduler_task(
    registry: SharedRegistry,
    store: Arc<dyn NodeStore>,
    flush_interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> FlushReport {
    log::info!(
        "⏰ Starting snapshot scheduler (interval: {}s)",
        flush_interval.as_secs()
    );

    let mut timer = interval_at(Instant::now() + flush_interval, flush_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                timed_flush(&registry, store.as_ref(), "Snapshot complete").await;
            }
            _ = &mut shutdown => {
                return timed_flush(&registry, store.as_ref(), "Final snapshot complete").await;
            }
        }
    }
}

async fn timed_flush(registry: &SharedRegistry, store: &dyn NodeStore, label: &str) -> FlushReport {
    let flush_start = std::time::Instant::now();
    let now_ms = chrono::Utc::now().timestamp_millis();
    let report = flush_snapshot(registry, store, now_ms).await;

    log::info!(
        "📊 {}: {} nodes, {} written, {} failed | {}ms",
        label,
        report.tracked,
        report.written,
        report.failed,
        flush_start.elapsed().as_millis()
    );
    report
}
