//! Node statistics registry
//!
//! Owns the in-memory table keyed by feed id. Every method is synchronous
//! and runs under the registry mutex; store I/O happens outside the lock.
//!
//! ## Snapshot discipline
//!
//! `take_snapshot()` reads every entry and swaps in fresh accumulators in a
//! single lock acquisition. The caller writes the returned values to the
//! store afterwards, so a block imported while those writes are in flight
//! lands in the next interval instead of being lost or counted twice.

use super::accumulator::AvgAccumulator;
use crate::feed::types::{BlockDetails, FeedNodeId, NodeStats};
use crate::store::{DurableNodeId, HistoryEntry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Registry shared between the feed session, spawned handlers and the
/// snapshot scheduler
pub type SharedRegistry = Arc<Mutex<NodeStatsRegistry>>;

/// Lock the registry. A poisoned lock is recovered: the table only holds
/// counters and gauges, and every mutation completes before unlocking.
pub fn lock_registry(registry: &SharedRegistry) -> MutexGuard<'_, NodeStatsRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rolling statistics of one tracked node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTrackingStats {
    pub durable_id: DurableNodeId,
    pub block_times: AvgAccumulator,
    pub propagation_times: AvgAccumulator,
    pub peer_count: u32,
    pub transactions_in_queue: u32,
    pub best_block_number: u64,
    pub best_block_hash: String,
}

impl NodeTrackingStats {
    /// Initial stats from a node announcement. The announced block counts
    /// as the first block-time sample.
    pub fn from_announcement(
        durable_id: DurableNodeId,
        stats: &NodeStats,
        block: &BlockDetails,
    ) -> Self {
        Self {
            durable_id,
            block_times: AvgAccumulator::with_sample(block.block_time_ms),
            propagation_times: AvgAccumulator::from_optional(block.propagation_time_ms),
            peer_count: stats.peer_count,
            transactions_in_queue: stats.transactions_in_queue,
            best_block_number: block.block_number,
            best_block_hash: block.block_hash.clone(),
        }
    }
}

/// Proof that a store create was issued for `feed_id`
///
/// Only the most recent ticket for a feed id may complete; a removal or a
/// newer announcement invalidates older tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddTicket {
    pub feed_id: FeedNodeId,
    generation: u64,
}

/// Values read out of the registry by a snapshot, ready to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHistory {
    pub feed_id: FeedNodeId,
    pub durable_id: DurableNodeId,
    pub block_times: AvgAccumulator,
    pub propagation_times: AvgAccumulator,
    pub peer_count: u32,
    pub transactions_in_queue: u32,
    pub best_block_number: u64,
    pub best_block_hash: String,
}

impl PendingHistory {
    pub fn into_entry(self, timestamp: i64, last_startup_time: Option<i64>) -> HistoryEntry {
        HistoryEntry {
            durable_node_id: self.durable_id,
            timestamp,
            avg_block_time: self.block_times.mean(),
            avg_propagation_time: self.propagation_times.mean(),
            peer_count: self.peer_count,
            transactions_in_queue: self.transactions_in_queue,
            best_block_number: self.best_block_number,
            best_block_hash: self.best_block_hash,
            blocks_processed: self.block_times.count(),
            uptime: last_startup_time.map(|startup| timestamp - startup),
        }
    }
}

#[derive(Debug, Default)]
pub struct NodeStatsRegistry {
    stats: HashMap<FeedNodeId, NodeTrackingStats>,
    pending_adds: HashMap<FeedNodeId, u64>,
    next_generation: u64,
}

impl NodeStatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Register an add about to be written to the store
    pub fn begin_add(&mut self, feed_id: FeedNodeId) -> AddTicket {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.pending_adds.insert(feed_id, generation);
        AddTicket { feed_id, generation }
    }

    /// Install stats for a completed create. Returns false (and installs
    /// nothing) when the ticket was superseded while the write was running.
    pub fn complete_add(&mut self, ticket: AddTicket, stats: NodeTrackingStats) -> bool {
        if self.pending_adds.get(&ticket.feed_id) != Some(&ticket.generation) {
            return false;
        }
        self.pending_adds.remove(&ticket.feed_id);
        if let Some(previous) = self.stats.insert(ticket.feed_id, stats) {
            log::debug!(
                "Feed id {} re-announced, replacing stats of durable id {}",
                ticket.feed_id,
                previous.durable_id
            );
        }
        true
    }

    /// Forget a pending add whose store create failed
    pub fn abandon_add(&mut self, ticket: AddTicket) {
        if self.pending_adds.get(&ticket.feed_id) == Some(&ticket.generation) {
            self.pending_adds.remove(&ticket.feed_id);
        }
    }

    /// Record an imported block. Returns false for unknown nodes.
    pub fn record_block(&mut self, feed_id: FeedNodeId, block: &BlockDetails) -> bool {
        let Some(stats) = self.stats.get_mut(&feed_id) else {
            return false;
        };
        stats.best_block_number = block.block_number;
        stats.best_block_hash.clone_from(&block.block_hash);
        stats.block_times.record(block.block_time_ms);
        if let Some(propagation) = block.propagation_time_ms {
            stats.propagation_times.record(propagation);
        }
        true
    }

    /// Overwrite the peer and queue gauges. Returns false for unknown nodes.
    pub fn update_node_stats(&mut self, feed_id: FeedNodeId, node_stats: &NodeStats) -> bool {
        let Some(stats) = self.stats.get_mut(&feed_id) else {
            return false;
        };
        stats.peer_count = node_stats.peer_count;
        stats.transactions_in_queue = node_stats.transactions_in_queue;
        true
    }

    /// Drop the in-memory entry (and any pending add) for `feed_id`.
    /// The durable record is untouched.
    pub fn remove_node(&mut self, feed_id: FeedNodeId) -> Option<NodeTrackingStats> {
        self.pending_adds.remove(&feed_id);
        self.stats.remove(&feed_id)
    }

    pub fn durable_id(&self, feed_id: FeedNodeId) -> Option<DurableNodeId> {
        self.stats.get(&feed_id).map(|stats| stats.durable_id)
    }

    pub fn get(&self, feed_id: FeedNodeId) -> Option<&NodeTrackingStats> {
        self.stats.get(&feed_id)
    }

    pub fn is_pending(&self, feed_id: FeedNodeId) -> bool {
        self.pending_adds.contains_key(&feed_id)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Read every tracked node and reset its accumulators in one step
    pub fn take_snapshot(&mut self) -> Vec<PendingHistory> {
        let mut pending: Vec<PendingHistory> = self
            .stats
            .iter_mut()
            .map(|(feed_id, stats)| PendingHistory {
                feed_id: *feed_id,
                durable_id: stats.durable_id,
                block_times: stats.block_times.take(),
                propagation_times: stats.propagation_times.take(),
                peer_count: stats.peer_count,
                transactions_in_queue: stats.transactions_in_queue,
                best_block_number: stats.best_block_number,
                best_block_hash: stats.best_block_hash.clone(),
            })
            .collect();
        pending.sort_by_key(|entry| entry.durable_id);
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, block_time_ms: u64, propagation_time_ms: Option<u64>) -> BlockDetails {
        BlockDetails {
            block_number: number,
            block_hash: format!("0x{:04x}", number),
            block_time_ms,
            block_timestamp: 1_700_000_000_000 + number,
            propagation_time_ms,
        }
    }

    fn stats() -> NodeStats {
        NodeStats { peer_count: 8, transactions_in_queue: 1 }
    }

    fn tracked(registry: &mut NodeStatsRegistry, feed_id: FeedNodeId, durable_id: DurableNodeId) {
        let ticket = registry.begin_add(feed_id);
        let initial = NodeTrackingStats::from_announcement(durable_id, &stats(), &block(1, 100, None));
        assert!(registry.complete_add(ticket, initial));
    }

    #[test]
    fn test_announcement_seeds_accumulators() {
        let initial = NodeTrackingStats::from_announcement(5, &stats(), &block(10, 100, None));
        assert_eq!(initial.block_times.count(), 1);
        assert_eq!(initial.block_times.sum(), 100);
        assert!(initial.propagation_times.is_empty());

        let with_propagation =
            NodeTrackingStats::from_announcement(5, &stats(), &block(10, 100, Some(40)));
        assert_eq!(with_propagation.propagation_times.mean(), Some(40));
    }

    #[test]
    fn test_blocks_accumulate_and_update_best_block() {
        let mut registry = NodeStatsRegistry::new();
        tracked(&mut registry, 1, 10);

        assert!(registry.record_block(1, &block(2, 200, Some(50))));
        assert!(registry.record_block(1, &block(3, 300, None)));

        let entry = registry.get(1).unwrap();
        assert_eq!(entry.block_times.count(), 3);
        assert_eq!(entry.block_times.sum(), 600);
        assert_eq!(entry.propagation_times.count(), 1);
        assert_eq!(entry.best_block_number, 3);
        assert_eq!(entry.best_block_hash, "0x0003");
    }

    #[test]
    fn test_unknown_node_events_are_dropped() {
        let mut registry = NodeStatsRegistry::new();
        assert!(!registry.record_block(99, &block(2, 200, None)));
        assert!(!registry.update_node_stats(99, &stats()));
        assert!(registry.remove_node(99).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_node_stats_overwrite_gauges() {
        let mut registry = NodeStatsRegistry::new();
        tracked(&mut registry, 1, 10);

        registry.update_node_stats(1, &NodeStats { peer_count: 20, transactions_in_queue: 4 });
        registry.update_node_stats(1, &NodeStats { peer_count: 3, transactions_in_queue: 0 });

        let entry = registry.get(1).unwrap();
        assert_eq!(entry.peer_count, 3);
        assert_eq!(entry.transactions_in_queue, 0);
    }

    #[test]
    fn test_removal_supersedes_pending_add() {
        let mut registry = NodeStatsRegistry::new();
        let ticket = registry.begin_add(1);
        assert!(registry.is_pending(1));

        registry.remove_node(1);
        let initial = NodeTrackingStats::from_announcement(10, &stats(), &block(1, 100, None));
        assert!(!registry.complete_add(ticket, initial));
        assert!(registry.get(1).is_none());
    }

    #[test]
    fn test_newer_announcement_wins() {
        let mut registry = NodeStatsRegistry::new();
        let older = registry.begin_add(1);
        let newer = registry.begin_add(1);

        let newer_stats = NodeTrackingStats::from_announcement(11, &stats(), &block(1, 100, None));
        assert!(registry.complete_add(newer, newer_stats));

        let older_stats = NodeTrackingStats::from_announcement(10, &stats(), &block(1, 100, None));
        assert!(!registry.complete_add(older, older_stats));
        registry.abandon_add(older);

        assert_eq!(registry.durable_id(1), Some(11));
    }

    #[test]
    fn test_snapshot_resets_accumulators_only() {
        let mut registry = NodeStatsRegistry::new();
        tracked(&mut registry, 1, 10);
        registry.record_block(1, &block(2, 200, Some(50)));

        let snapshot = registry.take_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].block_times.count(), 2);
        assert_eq!(snapshot[0].propagation_times.count(), 1);

        let entry = registry.get(1).unwrap();
        assert!(entry.block_times.is_empty());
        assert!(entry.propagation_times.is_empty());
        assert_eq!(entry.best_block_number, 2);
        assert_eq!(entry.peer_count, 8);
    }

    #[test]
    fn test_pending_history_into_entry() {
        let mut registry = NodeStatsRegistry::new();
        tracked(&mut registry, 1, 10);
        registry.record_block(1, &block(2, 200, Some(50)));

        let pending = registry.take_snapshot().remove(0);
        let entry = pending.into_entry(10_000, Some(4_000));
        assert_eq!(entry.durable_node_id, 10);
        assert_eq!(entry.blocks_processed, 2);
        assert_eq!(entry.avg_block_time, Some(150));
        assert_eq!(entry.avg_propagation_time, Some(50));
        assert_eq!(entry.uptime, Some(6_000));

        let empty = registry.take_snapshot().remove(0).into_entry(20_000, None);
        assert_eq!(empty.blocks_processed, 0);
        assert_eq!(empty.avg_block_time, None);
        assert_eq!(empty.avg_propagation_time, None);
        assert_eq!(empty.uptime, None);
    }
}
