use super::{DurableNodeId, HistoryEntry, Location, NewNode, NodeRecord, NodeStore, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryState {
    latest_id: DurableNodeId,
    nodes: BTreeMap<DurableNodeId, NodeRecord>,
    history: VecDeque<HistoryEntry>,
}

/// Entries kept by `MemoryNodeStore::new`
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// In-memory store with the same id semantics as SQLite AUTOINCREMENT:
/// ids grow monotonically and are never reused.
///
/// Meant for dry runs and tests. History is capped; once full, each append
/// evicts the oldest entry. Node records are never evicted.
#[derive(Debug)]
pub struct MemoryNodeStore {
    state: Mutex<MemoryState>,
    history_limit: usize,
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `history_limit` history entries (at least one)
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            history_limit: history_limit.max(1),
        }
    }

    /// Continue numbering after `latest_id`
    pub fn seeded(latest_id: DurableNodeId) -> Self {
        let store = Self::default();
        store.lock().latest_id = latest_id;
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn all_history(&self) -> Vec<HistoryEntry> {
        self.lock().history.iter().cloned().collect()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn create_node(&self, node: &NewNode) -> Result<DurableNodeId, StoreError> {
        let mut state = self.lock();
        state.latest_id += 1;
        let durable_id = state.latest_id;
        state
            .nodes
            .insert(durable_id, NodeRecord::from_new(durable_id, node));
        Ok(durable_id)
    }

    async fn find_node(&self, durable_id: DurableNodeId) -> Result<Option<NodeRecord>, StoreError> {
        Ok(self.lock().nodes.get(&durable_id).cloned())
    }

    async fn upsert_location(
        &self,
        durable_id: DurableNodeId,
        location: &Location,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let record = state
            .nodes
            .get_mut(&durable_id)
            .ok_or(StoreError::NotFound(durable_id))?;
        record.location = Some(location.clone());
        Ok(())
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.nodes.contains_key(&entry.durable_node_id) {
            return Err(StoreError::NotFound(entry.durable_node_id));
        }
        if state.history.len() == self.history_limit {
            state.history.pop_front();
        }
        state.history.push_back(entry.clone());
        Ok(())
    }

    async fn latest_durable_id(&self) -> Result<DurableNodeId, StoreError> {
        Ok(self.lock().latest_id)
    }

    async fn history_for(&self, durable_id: DurableNodeId) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self
            .lock()
            .history
            .iter()
            .filter(|entry| entry.durable_node_id == durable_id)
            .cloned()
            .collect())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
