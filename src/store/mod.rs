//! Persistent store boundary
//!
//! The tracker only ever creates node records, upserts their location and
//! appends history entries. Records are never deleted, so history stays
//! attributable after a node leaves the feed.
//!
//! Backends:
//! - `SqliteNodeStore` - durable, default for the runtime
//! - `MemoryNodeStore` - dry runs and tests

pub mod memory;
pub mod sqlite;

pub use memory::MemoryNodeStore;
pub use sqlite::SqliteNodeStore;

use async_trait::async_trait;
use serde::Deserialize;

/// Identifier assigned by the store when a node record is created.
///
/// Stable across feed reconnects and process restarts; the only identifier
/// history entries reference.
pub type DurableNodeId = i64;

/// Geographic location reported by the feed
///
/// Deserializes from the feed's `[lat, lng, city]` tuple.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub city: String,
}

/// Node record fields known at announcement time
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub node_name: String,
    pub node_implementation: String,
    pub node_version: String,
    pub address: Option<String>,
    pub network_id: Option<String>,
    /// Epoch millis
    pub last_startup_time: Option<i64>,
}

/// Durable node record
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub durable_id: DurableNodeId,
    pub node_name: String,
    pub node_implementation: String,
    pub node_version: String,
    pub address: Option<String>,
    pub network_id: Option<String>,
    pub location: Option<Location>,
    pub last_startup_time: Option<i64>,
}

impl NodeRecord {
    pub fn from_new(durable_id: DurableNodeId, node: &NewNode) -> Self {
        Self {
            durable_id,
            node_name: node.node_name.clone(),
            node_implementation: node.node_implementation.clone(),
            node_version: node.node_version.clone(),
            address: node.address.clone(),
            network_id: node.network_id.clone(),
            location: None,
            last_startup_time: node.last_startup_time,
        }
    }
}

/// One snapshot interval of a single node (append-only)
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub durable_node_id: DurableNodeId,
    /// Epoch millis of the flush that produced this entry
    pub timestamp: i64,
    pub avg_block_time: Option<u64>,
    pub avg_propagation_time: Option<u64>,
    pub peer_count: u32,
    pub transactions_in_queue: u32,
    pub best_block_number: u64,
    pub best_block_hash: String,
    pub blocks_processed: u64,
    /// `timestamp - last_startup_time`, when the startup time is known
    pub uptime: Option<i64>,
}

#[derive(Debug)]
pub enum StoreError {
    Database(String),
    NotFound(DurableNodeId),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::NotFound(id) => write!(f, "Node record {} not found", id),
        }
    }
}

impl std::error::Error for StoreError {}

/// Storage-agnostic persistence used by the tracker
///
/// The tracker treats the store as append/upsert-only and never assumes
/// exclusive access; a query layer may read concurrently.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Create a node record and return its durable id
    async fn create_node(&self, node: &NewNode) -> Result<DurableNodeId, StoreError>;

    /// Fetch a node record, including its location if one was stored
    async fn find_node(&self, durable_id: DurableNodeId) -> Result<Option<NodeRecord>, StoreError>;

    /// Insert or replace the location of an existing node
    async fn upsert_location(
        &self,
        durable_id: DurableNodeId,
        location: &Location,
    ) -> Result<(), StoreError>;

    /// Append one history entry (keyed by `entry.durable_node_id`)
    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError>;

    /// Highest durable id handed out so far (0 for an empty store)
    async fn latest_durable_id(&self) -> Result<DurableNodeId, StoreError>;

    /// History of one node, oldest first
    async fn history_for(&self, durable_id: DurableNodeId) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Backend type for logging
    fn backend_type(&self) -> &'static str;
}
