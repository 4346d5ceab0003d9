//! Feed event handlers bridging the registry and the store
//!
//! Handlers that only touch counters run synchronously under the registry
//! lock. Handlers that write to the store (node added, node located) are
//! async: they take the lock for their in-memory step, release it, then
//! await the store.

use super::registry::{lock_registry, AddTicket, NodeStatsRegistry, NodeTrackingStats, SharedRegistry};
use super::retry::{PostponedLocation, RetryPolicy};
use crate::feed::types::{AddedNode, BlockDetails, FeedNodeId, NodeStats};
use crate::store::{DurableNodeId, NodeStore, StoreError};
use std::sync::Arc;

/// Result of one location update attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationUpdate {
    Applied(DurableNodeId),
    NodeUnknown,
}

/// Final result of a location update including its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationOutcome {
    Applied {
        durable_id: DurableNodeId,
        postponed: u32,
    },
    /// The node never became known within the retry budget
    Abandoned { postponed: u32 },
    /// The store rejected the upsert
    Failed,
}

#[derive(Clone)]
pub struct NodeTracker {
    registry: SharedRegistry,
    store: Arc<dyn NodeStore>,
    retry_policy: RetryPolicy,
}

impl NodeTracker {
    pub fn new(store: Arc<dyn NodeStore>, retry_policy: RetryPolicy) -> Self {
        Self {
            registry: NodeStatsRegistry::shared(),
            store,
            retry_policy,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Create the durable record for an announced node, then start tracking
    /// it under its feed id. Persists the announced location, if any.
    pub async fn handle_added_node(&self, added: &AddedNode) -> Result<DurableNodeId, StoreError> {
        let ticket = self.begin_added_node(added.feed_id);
        self.complete_added_node(ticket, added).await
    }

    /// Synchronous half of a node announcement. Taking the ticket in feed
    /// order lets a later removal of the same feed id supersede it.
    pub fn begin_added_node(&self, feed_id: FeedNodeId) -> AddTicket {
        lock_registry(&self.registry).begin_add(feed_id)
    }

    /// Store half of a node announcement
    pub async fn complete_added_node(
        &self,
        ticket: AddTicket,
        added: &AddedNode,
    ) -> Result<DurableNodeId, StoreError> {
        log::debug!(
            "Adding new node to store (feed id: {}, name: {})...",
            added.feed_id,
            added.details.name
        );

        let durable_id = match self.store.create_node(&added.new_node()).await {
            Ok(id) => id,
            Err(e) => {
                lock_registry(&self.registry).abandon_add(ticket);
                return Err(e);
            }
        };

        let initial = NodeTrackingStats::from_announcement(durable_id, &added.stats, &added.block);
        let installed = lock_registry(&self.registry).complete_add(ticket, initial);
        if !installed {
            log::debug!(
                "Node {} left the feed before its record {} was written, not tracking",
                added.feed_id,
                durable_id
            );
        }

        if let Some(location) = &added.location {
            self.store.upsert_location(durable_id, location).await?;
        }

        log::debug!(
            "✅ New node added (feed id: {}, name: {}, durable id: {})",
            added.feed_id,
            added.details.name,
            durable_id
        );

        Ok(durable_id)
    }

    /// Returns false when the node is unknown (event dropped)
    pub fn handle_imported_block(&self, feed_id: FeedNodeId, block: &BlockDetails) -> bool {
        lock_registry(&self.registry).record_block(feed_id, block)
    }

    /// Returns false when the node is unknown (event dropped)
    pub fn handle_node_stats(&self, feed_id: FeedNodeId, stats: &NodeStats) -> bool {
        lock_registry(&self.registry).update_node_stats(feed_id, stats)
    }

    /// Stop tracking `feed_id`. The durable record and its history stay.
    pub fn handle_removed_node(&self, feed_id: FeedNodeId) -> bool {
        lock_registry(&self.registry).remove_node(feed_id).is_some()
    }

    /// Single attempt: upsert the location if the node's durable id is known
    pub async fn update_location(&self, task: &PostponedLocation) -> Result<LocationUpdate, StoreError> {
        let durable_id = lock_registry(&self.registry).durable_id(task.feed_id);

        match durable_id {
            Some(durable_id) => {
                self.store.upsert_location(durable_id, &task.location).await?;
                Ok(LocationUpdate::Applied(durable_id))
            }
            None => Ok(LocationUpdate::NodeUnknown),
        }
    }

    /// Apply a location update, postponing it while the node is unknown
    ///
    /// Sleeps `retry_policy.delay` between attempts and gives up once the
    /// task's budget is spent. Never panics or propagates: the outcome is
    /// logged and returned.
    pub async fn apply_location_with_retry(&self, task: PostponedLocation) -> LocationOutcome {
        let mut task = task;

        loop {
            match self.update_location(&task).await {
                Ok(LocationUpdate::Applied(durable_id)) => {
                    log::debug!(
                        "📍 Updated node location {}/{} - {}",
                        task.feed_id,
                        durable_id,
                        task.location.city
                    );
                    return LocationOutcome::Applied {
                        durable_id,
                        postponed: task.postponed(),
                    };
                }
                Ok(LocationUpdate::NodeUnknown) => {
                    let feed_id = task.feed_id;
                    let postponed = task.postponed();

                    match task.postpone() {
                        Some(next) => {
                            log::debug!(
                                "Node {} not yet in store, postponing location update by {}ms ({} left)",
                                feed_id,
                                self.retry_policy.delay.as_millis(),
                                next.attempts_remaining()
                            );
                            tokio::time::sleep(self.retry_policy.delay).await;
                            task = next;
                        }
                        None => {
                            log::error!(
                                "❌ Postponed location update failed {} times in a row for feed id {}, giving up",
                                postponed,
                                feed_id
                            );
                            return LocationOutcome::Abandoned { postponed };
                        }
                    }
                }
                Err(e) => {
                    log::error!("❌ Failed to store location for feed id {}: {}", task.feed_id, e);
                    return LocationOutcome::Failed;
                }
            }
        }
    }
}
