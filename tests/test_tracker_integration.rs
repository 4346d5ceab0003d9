//! Integration tests: feed events through the tracker into the store
//!
//! Covers the flush contract end to end:
//! - Block counts and integer means per interval
//! - Events for unknown nodes are dropped
//! - Location updates racing ahead of their node announcement
//! - Reset-before-write while a slow store write is in flight

#[cfg(test)]
mod tracker_integration_tests {
    use async_trait::async_trait;
    use node_telemetry_tracker::feed::types::{AddedNode, BlockDetails, NodeDetails, NodeStats};
    use node_telemetry_tracker::feed::{FeedNodeId, FeedSession};
    use node_telemetry_tracker::scheduler::{flush_snapshot, FlushReport};
    use node_telemetry_tracker::store::{
        DurableNodeId, HistoryEntry, Location, MemoryNodeStore, NewNode, NodeRecord, NodeStore,
        SqliteNodeStore, StoreError,
    };
    use node_telemetry_tracker::tracker::{
        lock_registry, LocationOutcome, NodeTracker, PostponedLocation, RetryPolicy,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tokio::sync::Notify;

    fn block(number: u64, block_time_ms: u64, propagation_time_ms: Option<u64>) -> BlockDetails {
        BlockDetails {
            block_number: number,
            block_hash: format!("0x{:x}", number),
            block_time_ms,
            block_timestamp: 1_700_000_000_000,
            propagation_time_ms,
        }
    }

    fn announcement(feed_id: FeedNodeId, block_time_ms: u64) -> AddedNode {
        AddedNode {
            feed_id,
            details: NodeDetails {
                name: format!("validator-{}", feed_id),
                implementation: "joystream-node".to_string(),
                version: "3.1.0".to_string(),
                address: Some("12D3KooW".to_string()),
                network_id: None,
            },
            stats: NodeStats { peer_count: 12, transactions_in_queue: 0 },
            block: block(1, block_time_ms, None),
            location: None,
            startup_time: None,
        }
    }

    fn berlin() -> Location {
        Location { lat: 52.52, lng: 13.40, city: "Berlin".to_string() }
    }

    /// Memory store whose first history append blocks until released
    struct GatedStore {
        inner: MemoryNodeStore,
        gated: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: MemoryNodeStore::new(),
                gated: AtomicBool::new(true),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl NodeStore for GatedStore {
        async fn create_node(&self, node: &NewNode) -> Result<DurableNodeId, StoreError> {
            self.inner.create_node(node).await
        }

        async fn find_node(&self, durable_id: DurableNodeId) -> Result<Option<NodeRecord>, StoreError> {
            self.inner.find_node(durable_id).await
        }

        async fn upsert_location(
            &self,
            durable_id: DurableNodeId,
            location: &Location,
        ) -> Result<(), StoreError> {
            self.inner.upsert_location(durable_id, location).await
        }

        async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
            if self.gated.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.append_history(entry).await
        }

        async fn latest_durable_id(&self) -> Result<DurableNodeId, StoreError> {
            self.inner.latest_durable_id().await
        }

        async fn history_for(&self, durable_id: DurableNodeId) -> Result<Vec<HistoryEntry>, StoreError> {
            self.inner.history_for(durable_id).await
        }

        fn backend_type(&self) -> &'static str {
            "gated"
        }
    }

    #[tokio::test]
    async fn test_blocks_between_flushes_are_counted_and_averaged() {
        let store = Arc::new(MemoryNodeStore::new());
        let tracker = NodeTracker::new(store.clone(), RetryPolicy::default());
        let durable_id = tracker.handle_added_node(&announcement(1, 6_000)).await.unwrap();

        for (i, block_time) in [5_000u64, 6_500, 7_001].iter().enumerate() {
            assert!(tracker.handle_imported_block(1, &block(2 + i as u64, *block_time, Some(90))));
        }

        let report = flush_snapshot(tracker.registry(), &*store, 10_000).await;
        assert_eq!(report, FlushReport { tracked: 1, written: 1, failed: 0 });

        let history = store.history_for(durable_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].blocks_processed, 4);
        // (6000 + 5000 + 6500 + 7001) / 4, truncated
        assert_eq!(history[0].avg_block_time, Some(6_125));
        assert_eq!(history[0].avg_propagation_time, Some(90));
        assert_eq!(history[0].best_block_number, 4);
        assert_eq!(history[0].peer_count, 12);
    }

    #[tokio::test]
    async fn test_events_for_unknown_node_change_nothing() {
        let store = Arc::new(MemoryNodeStore::new());
        let tracker = NodeTracker::new(store.clone(), RetryPolicy::default());
        let durable_id = tracker.handle_added_node(&announcement(1, 100)).await.unwrap();

        assert!(!tracker.handle_imported_block(99, &block(2, 500, Some(10))));
        assert!(!tracker.handle_node_stats(99, &NodeStats { peer_count: 1, transactions_in_queue: 1 }));
        assert!(!tracker.handle_removed_node(99));

        flush_snapshot(tracker.registry(), &*store, 1_000).await;
        let history = store.history_for(durable_id).await.unwrap();
        assert_eq!(history[0].blocks_processed, 1);
        assert_eq!(history[0].avg_block_time, Some(100));
        assert_eq!(store.all_history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_before_announcement_is_applied_after_retry() {
        let store = Arc::new(MemoryNodeStore::new());
        let policy = RetryPolicy { delay: Duration::from_millis(200), max_attempts: 10 };
        let tracker = NodeTracker::new(store.clone(), policy);

        let location_tracker = tracker.clone();
        let located = tokio::spawn(async move {
            let task = PostponedLocation::new(7, berlin(), &policy);
            location_tracker.apply_location_with_retry(task).await
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        let durable_id = tracker.handle_added_node(&announcement(7, 100)).await.unwrap();

        match located.await.unwrap() {
            LocationOutcome::Applied { durable_id: applied_to, postponed } => {
                assert_eq!(applied_to, durable_id);
                assert!(postponed >= 2);
            }
            other => panic!("expected the location to be applied, got {:?}", other),
        }

        let record = store.find_node(durable_id).await.unwrap().unwrap();
        assert_eq!(record.location, Some(berlin()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_for_never_announced_node_is_abandoned() {
        let store = Arc::new(MemoryNodeStore::new());
        let policy = RetryPolicy { delay: Duration::from_millis(200), max_attempts: 3 };
        let tracker = NodeTracker::new(store.clone(), policy);

        let task = PostponedLocation::new(404, berlin(), &policy);
        let outcome = tokio::spawn(async move { tracker.apply_location_with_retry(task).await })
            .await
            .unwrap();

        assert_eq!(outcome, LocationOutcome::Abandoned { postponed: 3 });
        assert_eq!(store.node_count(), 0);
    }

    #[tokio::test]
    async fn test_block_during_slow_write_lands_in_next_entry() {
        let store = Arc::new(GatedStore::new());
        let tracker = NodeTracker::new(store.clone(), RetryPolicy::default());
        let durable_id = tracker.handle_added_node(&announcement(3, 100)).await.unwrap();
        tracker.handle_imported_block(3, &block(2, 200, None));

        let registry = tracker.registry().clone();
        let flush_store = store.clone();
        let first_flush = tokio::spawn(async move {
            flush_snapshot(&registry, &*flush_store, 1_000).await
        });

        // The first flush has already reset the accumulators
        store.entered.notified().await;
        assert!(tracker.handle_imported_block(3, &block(3, 400, None)));
        store.release.notify_one();
        assert_eq!(first_flush.await.unwrap().written, 1);

        flush_snapshot(tracker.registry(), &*store, 2_000).await;

        let history = store.history_for(durable_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].blocks_processed, 2);
        assert_eq!(history[0].avg_block_time, Some(150));
        assert_eq!(history[1].blocks_processed, 1);
        assert_eq!(history[1].avg_block_time, Some(400));

        let total: u64 = history
            .iter()
            .map(|entry| entry.avg_block_time.unwrap_or(0) * entry.blocks_processed)
            .sum();
        assert_eq!(total, 100 + 200 + 400);
    }

    #[tokio::test]
    async fn test_second_flush_without_events_is_empty() {
        let store = Arc::new(MemoryNodeStore::new());
        let tracker = NodeTracker::new(store.clone(), RetryPolicy::default());
        let durable_id = tracker.handle_added_node(&announcement(1, 100)).await.unwrap();
        tracker.handle_imported_block(1, &block(2, 200, Some(30)));

        flush_snapshot(tracker.registry(), &*store, 1_000).await;
        flush_snapshot(tracker.registry(), &*store, 2_000).await;

        let history = store.history_for(durable_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].blocks_processed, 0);
        assert_eq!(history[1].avg_block_time, None);
        assert_eq!(history[1].avg_propagation_time, None);
        // Gauges carry over
        assert_eq!(history[1].best_block_number, 2);
        assert_eq!(history[1].peer_count, 12);
    }

    #[tokio::test]
    async fn test_node_lifecycle_end_to_end() {
        let store = Arc::new(MemoryNodeStore::new());
        let tracker = NodeTracker::new(store.clone(), RetryPolicy::default());

        let first_id = tracker.handle_added_node(&announcement(1, 100)).await.unwrap();
        tracker.handle_imported_block(1, &block(2, 200, Some(50)));

        flush_snapshot(tracker.registry(), &*store, 1_000).await;
        let history = store.history_for(first_id).await.unwrap();
        assert_eq!(history[0].blocks_processed, 2);
        assert_eq!(history[0].avg_block_time, Some(150));
        assert_eq!(history[0].avg_propagation_time, Some(50));

        assert!(tracker.handle_removed_node(1));
        assert!(!tracker.handle_imported_block(1, &block(3, 300, None)));
        assert!(lock_registry(tracker.registry()).is_empty());

        let report = flush_snapshot(tracker.registry(), &*store, 2_000).await;
        assert_eq!(report.tracked, 0);
        assert_eq!(store.history_for(first_id).await.unwrap().len(), 1);

        let second_id = tracker.handle_added_node(&announcement(1, 100)).await.unwrap();
        assert_ne!(second_id, first_id);
        assert_eq!(lock_registry(tracker.registry()).durable_id(1), Some(second_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_frames_into_sqlite_history() {
        let db_file = NamedTempFile::new().unwrap();
        let store = Arc::new(SqliteNodeStore::open(db_file.path()).unwrap());
        let tracker = NodeTracker::new(store.clone(), RetryPolicy::default());
        let mut session = FeedSession::new(tracker.clone());

        session
            .handle_frame(
                r#"[0, 31, 13, "Joystream",
                    3, [21, ["bob", "joystream-node", "3.1.0", "12D3KooW", null], [9, 2], null, null,
                        [100, "0x64", 100, 1700000000000, null], null, 1699999000000]]"#,
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        session
            .handle_frame(
                r#"[6, [21, [101, "0x65", 200, 1700000006000, 50]],
                    8, [21, [11, 4]],
                    5, [21, 52.52, 13.4, "Berlin"]]"#,
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let durable_id = lock_registry(tracker.registry()).durable_id(21).unwrap();
        flush_snapshot(tracker.registry(), &*store, 1_700_000_000_000).await;

        let record = store.find_node(durable_id).await.unwrap().unwrap();
        assert_eq!(record.node_name, "bob");
        assert_eq!(record.location, Some(berlin()));

        let history = store.history_for(durable_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].blocks_processed, 2);
        assert_eq!(history[0].avg_block_time, Some(150));
        assert_eq!(history[0].avg_propagation_time, Some(50));
        assert_eq!(history[0].peer_count, 11);
        assert_eq!(history[0].transactions_in_queue, 4);
        assert_eq!(history[0].best_block_hash, "0x65");
        assert_eq!(history[0].uptime, Some(1_000_000));
    }
}
